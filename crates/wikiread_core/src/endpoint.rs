use crate::error::ProviderError;

/// Paths under the Wikimedia core REST API base.
///
/// Page-scoped variants take the page `key` from a search hit; `File` takes the
/// `title` of an entry returned by the page files listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    SearchPages,
    SearchTitles,
    Page { key: String },
    PageHtml { key: String },
    PageWithHtml { key: String },
    PageFiles { key: String },
    PageLinks { key: String },
    File { name: String },
}

impl Endpoint {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SearchPages => "search/page",
            Self::SearchTitles => "search/title",
            Self::Page { .. } => "page/{page}",
            Self::PageHtml { .. } => "page/{page}/html",
            Self::PageWithHtml { .. } => "page/{page}/with_html",
            Self::PageFiles { .. } => "page/{page}/files",
            Self::PageLinks { .. } => "page/{page}/links",
            Self::File { .. } => "file/{file}",
        }
    }

    /// Path segments below the API base, unescaped. Fails for endpoints the
    /// provider has no operation for.
    pub fn segments(&self) -> Result<Vec<&str>, ProviderError> {
        match self {
            Self::SearchPages => Ok(vec!["search", "page"]),
            Self::SearchTitles => Ok(vec!["search", "title"]),
            Self::Page { key } => Ok(vec!["page", key.as_str()]),
            Self::PageHtml { key } => Ok(vec!["page", key.as_str(), "html"]),
            Self::PageWithHtml { .. }
            | Self::PageFiles { .. }
            | Self::PageLinks { .. }
            | Self::File { .. } => Err(ProviderError::UnsupportedEndpoint(self.name())),
        }
    }
}

/// Turn a human title into the key form the REST API expects.
pub fn title_to_key(title: &str) -> String {
    title.trim().replace(' ', "_")
}
