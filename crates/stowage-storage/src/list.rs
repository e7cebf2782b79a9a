use std::collections::BTreeSet;

use stowage_metadata::ObjectMetadata;

pub const DEFAULT_MAX_RESULTS: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct ListObjectsResponse {
    pub prefixes: Vec<String>,
    pub items: Vec<ObjectMetadata>,
    pub next_page_token: Option<String>,
}

/// One page of names and the sorted prefix set.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ListPage {
    pub names: Vec<String>,
    pub prefixes: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Splits `names` into items and delimiter-rolled prefixes under `prefix`.
///
/// Names whose remainder after `prefix` contains `delimiter` collapse into
/// `prefix + remainder[..=delimiter]`. Items are sorted, resumed at
/// `page_token` when it names an item, and cut at `max_results` with the
/// first excluded name as the next token.
pub(crate) fn list_page<'a>(
    names: impl IntoIterator<Item = &'a str>,
    prefix: &str,
    delimiter: &str,
    page_token: Option<&str>,
    max_results: Option<usize>,
) -> ListPage {
    let mut items = Vec::new();
    let mut prefixes = BTreeSet::new();

    for name in names {
        let Some(remainder) = name.strip_prefix(prefix) else {
            continue;
        };
        match (!delimiter.is_empty())
            .then(|| remainder.find(delimiter))
            .flatten()
        {
            Some(pos) => {
                prefixes.insert(format!("{prefix}{}", &remainder[..pos + delimiter.len()]));
            }
            None => items.push(name.to_string()),
        }
    }

    items.sort();
    if let Some(token) = page_token
        && let Some(start) = items.iter().position(|name| name == token)
    {
        items.drain(..start);
    }

    let max_results = max_results
        .filter(|max| *max > 0)
        .unwrap_or(DEFAULT_MAX_RESULTS);
    let next_page_token = items.get(max_results).cloned();
    items.truncate(max_results);

    ListPage {
        names: items,
        prefixes: prefixes.into_iter().collect(),
        next_page_token,
    }
}
