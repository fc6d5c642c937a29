use std::collections::BTreeSet;
use std::path::Path;

pub const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp"];

/// Case-insensitive set of file extensions, stored without the leading dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionSet {
    extensions: BTreeSet<String>,
}

impl ExtensionSet {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .filter_map(|ext| normalize(ext.as_ref()))
            .collect();
        Self { extensions }
    }

    /// Parses a comma separated list such as `jpg, .PNG,gif`.
    pub fn parse_list(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }

    pub fn matches_path(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_ascii_lowercase()))
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.matches_path(Path::new(name))
    }
}

impl Default for ExtensionSet {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS)
    }
}

fn normalize(ext: &str) -> Option<String> {
    let ext = ext.trim().trim_start_matches('.');
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

/// Decodes the whole file; a header that parses over a truncated body still fails.
pub fn verify_image(path: &Path) -> Result<(), image::ImageError> {
    image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map(|_| ())
}
