//! Source URI interpretation.
//!
//! GitHub branch listings (`https://api.github.com/repos/<owner>/<repo>/branches`)
//! get GitHub archive and preview URLs. Any other URL is treated as a plain
//! directory of `<name>.zip` archives.

use url::Url;

use crate::error::{SyncError, SyncResult};

/// A parsed registry source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    GitHub { owner: String, repo: String },
    Generic { base: String },
}

impl SourceSpec {
    pub fn parse(uri: &str) -> SyncResult<Self> {
        let url = Url::parse(uri).map_err(|e| SyncError::network(uri, format!("invalid source URL: {}", e)))?;

        if url.host_str() == Some("api.github.com") {
            let segments: Vec<&str> = url
                .path_segments()
                .map(|s| s.filter(|seg| !seg.is_empty()).collect())
                .unwrap_or_default();
            if let ["repos", owner, repo, "branches"] = segments.as_slice() {
                return Ok(Self::GitHub {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                });
            }
        }

        Ok(Self::Generic {
            base: uri.trim_end_matches('/').to_string(),
        })
    }

    /// Short human-readable name, `owner/repo` for GitHub sources.
    pub fn display_name(&self) -> String {
        match self {
            Self::GitHub { owner, repo } => format!("{}/{}", owner, repo),
            Self::Generic { base } => base.clone(),
        }
    }

    pub fn archive_url(&self, pack: &str) -> String {
        match self {
            Self::GitHub { owner, repo } => format!(
                "https://github.com/{}/{}/archive/refs/heads/{}.zip",
                owner, repo, pack
            ),
            Self::Generic { base } => format!("{}/{}.zip", base, pack),
        }
    }

    pub fn preview_url(&self, pack: &str) -> Option<String> {
        match self {
            Self::GitHub { owner, repo } => Some(format!(
                "https://raw.githubusercontent.com/{}/{}/{}/ver.jpg",
                owner, repo, pack
            )),
            Self::Generic { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_source() {
        let spec =
            SourceSpec::parse("https://api.github.com/repos/bertidiego/SkinX-icons/branches")
                .unwrap();
        assert_eq!(spec.display_name(), "bertidiego/SkinX-icons");
        assert_eq!(
            spec.archive_url("dark"),
            "https://github.com/bertidiego/SkinX-icons/archive/refs/heads/dark.zip"
        );
        assert_eq!(
            spec.preview_url("dark").as_deref(),
            Some("https://raw.githubusercontent.com/bertidiego/SkinX-icons/dark/ver.jpg")
        );
    }

    #[test]
    fn test_generic_source() {
        let spec = SourceSpec::parse("https://packs.example.org/icons/").unwrap();
        assert_eq!(spec.display_name(), "https://packs.example.org/icons");
        assert_eq!(
            spec.archive_url("dark"),
            "https://packs.example.org/icons/dark.zip"
        );
        assert!(spec.preview_url("dark").is_none());
    }

    #[test]
    fn test_github_host_with_other_path_is_generic() {
        let spec = SourceSpec::parse("https://api.github.com/repos/a/b/tags").unwrap();
        assert!(matches!(spec, SourceSpec::Generic { .. }));
    }

    #[test]
    fn test_invalid_source() {
        let err = SourceSpec::parse("not a url").unwrap_err();
        assert!(err.to_string().contains("not a url"));
    }
}
