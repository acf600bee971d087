//! image::reference
//!
//! Image reference parsing and normalization.
//!
//! References follow the container registry grammar
//! `[domain[:port]/]path[:tag][@digest]`. Normalization validates the
//! reference and appends `:latest` when no tag is present; it does not add
//! a default registry or `library/` prefix, so `alpine` becomes
//! `alpine:latest`.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use super::ImageError;

const DEFAULT_TAG: &str = "latest";
const MAX_NAME_LEN: usize = 255;

fn reference_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let component = r"[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?";
        let domain = format!(r"{c}(?:\.{c})*(?::[0-9]+)?", c = component);
        let path_component = r"[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*";
        let pattern = format!(
            r"^(?:(?P<domain>{domain})/)?(?P<path>{p}(?:/{p})*)(?::(?P<tag>[\w][\w.-]{{0,127}}))?(?:@(?P<digest>[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{{32,}}))?$",
            domain = domain,
            p = path_component
        );
        Regex::new(&pattern).expect("valid reference regex")
    })
}

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    /// Everything before the tag: `[domain/]path`.
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageRef {
    /// Parse a reference.
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Err("repository name must have at least one component".to_string());
        }
        let captures = reference_pattern()
            .captures(raw)
            .ok_or_else(|| "invalid reference format".to_string())?;

        let path = captures.name("path").map_or("", |m| m.as_str());
        let name = match captures.name("domain") {
            Some(domain) => format!("{}/{}", domain.as_str(), path),
            None => path.to_string(),
        };
        if name.len() > MAX_NAME_LEN {
            return Err(format!(
                "repository name must not be more than {} characters",
                MAX_NAME_LEN
            ));
        }

        Ok(Self {
            name,
            tag: captures.name("tag").map(|m| m.as_str().to_string()),
            digest: captures.name("digest").map(|m| m.as_str().to_string()),
        })
    }

    /// The same reference with `:latest` if it had no tag.
    pub fn with_default_tag(mut self) -> Self {
        if self.tag.is_none() {
            self.tag = Some(DEFAULT_TAG.to_string());
        }
        self
    }

    /// Tag, `latest` when absent.
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Normalize one reference: validate it and default the tag.
pub fn normalize(raw: &str) -> Result<String, String> {
    ImageRef::parse(raw).map(|r| r.with_default_tag().to_string())
}

/// Normalize every reference, reporting every invalid one at once.
pub fn normalize_all<S: AsRef<str>>(images: &[S]) -> Result<Vec<String>, ImageError> {
    let mut normalized = Vec::with_capacity(images.len());
    let mut errors = Vec::new();
    for image in images {
        let image = image.as_ref();
        match normalize(image) {
            Ok(name) => normalized.push(name),
            Err(e) => errors.push(format!("Error parsing image name '{}': {}", image, e)),
        }
    }
    if errors.is_empty() {
        Ok(normalized)
    } else {
        Err(ImageError::InvalidImageName(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_latest_when_untagged() {
        assert_eq!(normalize("alpine").expect("valid"), "alpine:latest");
        assert_eq!(normalize("alpine:1.24").expect("valid"), "alpine:1.24");
        assert_eq!(
            normalize("openshift/origin-docker-registry").expect("valid"),
            "openshift/origin-docker-registry:latest"
        );
    }

    #[test]
    fn registry_port_is_not_a_tag() {
        assert_eq!(
            normalize("localhost:5000/tools/app").expect("valid"),
            "localhost:5000/tools/app:latest"
        );
        assert_eq!(
            normalize("registry.example.com:5000/app:v2").expect("valid"),
            "registry.example.com:5000/app:v2"
        );
    }

    #[test]
    fn digest_is_preserved() {
        let digest = format!("sha256:{}", "a".repeat(64));
        assert_eq!(
            normalize(&format!("alpine@{}", digest)).expect("valid"),
            format!("alpine:latest@{}", digest)
        );
    }

    #[test]
    fn rejects_bad_references() {
        assert!(normalize("").is_err());
        assert!(normalize("Alpine").is_err());
        assert!(normalize("alpine:").is_err());
        assert!(normalize("al pine").is_err());
        assert!(normalize("alpine::1").is_err());
    }

    #[test]
    fn normalize_all_aggregates_errors() {
        let err = normalize_all(&["alpine", "UPPER", "bad name"]).unwrap_err();
        match err {
            ImageError::InvalidImageName(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].starts_with("Error parsing image name 'UPPER'"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn parse_exposes_parts() {
        let r = ImageRef::parse("docker.io/openshift/origin:v3.6.0").expect("valid");
        assert_eq!(r.name, "docker.io/openshift/origin");
        assert_eq!(r.tag.as_deref(), Some("v3.6.0"));
        assert_eq!(ImageRef::parse("busybox").expect("valid").tag_or_default(), "latest");
    }
}
