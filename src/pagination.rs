use regex::Regex;
use std::sync::LazyLock;

static PAGE_INFO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)-(\d+) of (\d+)").unwrap());

/// What the grid's "start-end of total" label says about remaining pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    More { end: u64, total: u64 },
    Last { total: u64 },
    /// Label missing or not in the expected shape; treated as exhaustion.
    Unparsed,
}

impl PageState {
    pub fn parse(text: &str) -> Self {
        let Some(caps) = PAGE_INFO.captures(text) else {
            return Self::Unparsed;
        };
        let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
        match (number(2), number(3)) {
            (Some(end), Some(total)) if end < total => Self::More { end, total },
            (Some(_), Some(total)) => Self::Last { total },
            _ => Self::Unparsed,
        }
    }

    pub fn has_next(&self) -> bool {
        matches!(self, Self::More { .. })
    }
}
