/// Package identity and version extracted from one DefinitelyTyped file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub name: String,
    pub version: String,
    pub homepage: Option<String>,
}

/// A parsed JSON registry document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistryEntry {
    pub homepage: Option<String>,
    /// `None` when the document predates the `versions` map; such documents
    /// carry nothing to index.
    pub versions: Option<Vec<RegistryVersion>>,
}

/// One location published for a version in a registry document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryVersion {
    pub version: String,
    pub location: String,
    pub compiler: Option<String>,
    pub description: Option<String>,
}
impl RegistryVersion {
    pub(crate) fn bare(version: &str, location: String) -> Self {
        Self {
            version: version.to_string(),
            location,
            compiler: None,
            description: None,
        }
    }
}
