use crate::error::FetchError;
use crate::models::{DetailFact, FundCategory, FundListingRow};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

// ── Markup signatures ─────────────────────────────────────────────────────────

/// Parent classes of the code, title and founder links on a listing page.
pub const LISTING_CELL_CLASSES: [&str; 3] = [
    "comp-cell _04 vtable",
    "comp-cell _08 vtable",
    "comp-cell _009 vtable",
];

pub const DETAIL_ROW_CLASS: &str = "w-clearfix w-inline-block a-table-row";
pub const DETAIL_CELL_CLASS: &str = "comp-cell-row-div vtable infoColumn";

/// How an element's class list is compared, after whitespace normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassSignature<'s> {
    Exact(&'s str),
    Contains(&'s str),
}

impl ClassSignature<'_> {
    pub fn matches(&self, el: ElementRef<'_>) -> bool {
        let Some(classes) = class_string(el) else { return false };
        match self {
            ClassSignature::Exact(sig) => classes == *sig,
            ClassSignature::Contains(sig) => classes.contains(sig),
        }
    }
}

/// Space-joined class list, or `None` when the element has none.
pub fn class_string(el: ElementRef<'_>) -> Option<String> {
    let attr = el.value().attr("class")?;
    let joined = attr.split_whitespace().collect::<Vec<_>>().join(" ");
    if joined.is_empty() { None } else { Some(joined) }
}

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Selector(format!("{}: {:?}", css, e)))
}

/// Descendants of `root` named `tag` whose class list fits `signature`.
/// Empty when nothing matches.
pub fn find_by_class_signature<'a>(
    root: ElementRef<'a>,
    tag: &str,
    signature: ClassSignature<'_>,
) -> Result<Vec<ElementRef<'a>>, FetchError> {
    let sel = selector(tag)?;
    Ok(root.select(&sel).filter(|el| signature.matches(*el)).collect())
}

/// Text content with every fragment trimmed, concatenated.
pub fn text_of(el: ElementRef<'_>) -> String {
    el.text().map(str::trim).collect()
}

// ── Listing page ──────────────────────────────────────────────────────────────

/// Texts of the links sitting directly inside one of the listing cells,
/// in document order.
pub fn parse_listing_links(html: &str) -> Result<Vec<String>, FetchError> {
    let doc = Html::parse_document(html);
    let a_sel = selector("a")?;

    let links = doc
        .select(&a_sel)
        .filter(|a| {
            a.parent()
                .and_then(ElementRef::wrap)
                .and_then(class_string)
                .is_some_and(|c| LISTING_CELL_CLASSES.contains(&c.as_str()))
        })
        .map(text_of)
        .collect();
    Ok(links)
}

/// Group a flat sequence into consecutive triplets. A trailing group of
/// fewer than three entries is dropped.
pub fn group_triplets(items: Vec<String>) -> Vec<[String; 3]> {
    let leftover = items.len() % 3;
    if leftover != 0 {
        debug!("Dropping {} trailing listing link(s)", leftover);
    }
    let mut iter = items.into_iter();
    let mut out = Vec::new();
    while let (Some(a), Some(b), Some(c)) = (iter.next(), iter.next(), iter.next()) {
        out.push([a, b, c]);
    }
    out
}

pub fn parse_listing_page(html: &str, kind: FundCategory) -> Result<Vec<FundListingRow>, FetchError> {
    let links = parse_listing_links(html)?;
    let rows = group_triplets(links)
        .into_iter()
        .filter_map(|[code, title, founder]| {
            if title.is_empty() {
                warn!("{}: listing row with code {:?} has no title, skipped", kind, code);
                return None;
            }
            Some(FundListingRow { code, title, founder, kind })
        })
        .collect();
    Ok(rows)
}

// ── Detail pages ──────────────────────────────────────────────────────────────

/// One table-row anchor: its label span (if any) and info cells in order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetailRow {
    pub label: Option<String>,
    pub cells: Vec<String>,
}

pub fn parse_detail_rows(html: &str) -> Result<Vec<DetailRow>, FetchError> {
    let doc = Html::parse_document(html);
    let span_sel = selector("span")?;

    let anchors = find_by_class_signature(doc.root_element(), "a", ClassSignature::Contains(DETAIL_ROW_CLASS))?;
    let mut rows = Vec::with_capacity(anchors.len());
    for a in anchors {
        let label = a.select(&span_sel).next().map(text_of);
        let cells = find_by_class_signature(a, "div", ClassSignature::Exact(DETAIL_CELL_CLASS))?
            .into_iter()
            .map(text_of)
            .collect();
        rows.push(DetailRow { label, cells });
    }
    Ok(rows)
}

/// Label plus first info cell per row. Rows lacking either are skipped;
/// extra cells are ignored.
pub fn parse_detail_single(html: &str) -> Result<Vec<DetailFact>, FetchError> {
    let facts = parse_detail_rows(html)?
        .into_iter()
        .filter_map(|row| {
            let title = row.label?;
            let value = row.cells.into_iter().next()?;
            Some(DetailFact { title, value: Some(value) })
        })
        .collect();
    Ok(facts)
}

/// Positional variant for pages with several info cells per row: the label
/// and all cells form one flat row, the first row is a header and is
/// consumed, then positions 0 and 2 become `(title, value)`.
pub fn parse_detail_multi(html: &str) -> Result<Vec<DetailFact>, FetchError> {
    let flat: Vec<Vec<String>> = parse_detail_rows(html)?
        .into_iter()
        .map(|row| row.label.into_iter().chain(row.cells).collect())
        .collect();

    let Some((header, body)) = flat.split_first() else {
        return Ok(Vec::new());
    };
    debug!("Multi-column detail header: {:?}", header);

    let facts = body
        .iter()
        .filter_map(|row| {
            let title = row.first()?.clone();
            Some(DetailFact { title, value: row.get(2).cloned() })
        })
        .collect();
    Ok(facts)
}
