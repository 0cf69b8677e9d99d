use std::fmt;
use std::path::Path;

use serde::Serialize;

/// Group, name and version of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModuleId {
    pub group: String,
    pub name: String,
    pub version: String,
}

impl ModuleId {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        ModuleId {
            group: group.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.version)
    }
}

/// A single file of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ArtifactRef {
    pub module: ModuleId,
    pub file: String,
}

const METADATA_SUFFIXES: &[&str] = &[".pom", ".module", ".ivy.xml"];

impl ArtifactRef {
    pub fn new(module: ModuleId, file: impl Into<String>) -> Self {
        ArtifactRef {
            module,
            file: file.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.module.group
    }

    pub fn name(&self) -> &str {
        &self.module.name
    }

    pub fn version(&self) -> &str {
        &self.module.version
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// The part of the file name after `name-version`, if the file follows
    /// the Maven naming convention.
    fn maven_suffix(&self) -> Option<&str> {
        let prefix = format!("{}-{}", self.module.name, self.module.version);
        self.file.strip_prefix(prefix.as_str())
    }

    /// The Maven classifier, as `sources` in `lib-1.0-sources.jar`.
    pub fn classifier(&self) -> Option<&str> {
        let rest = self.maven_suffix()?.strip_prefix('-')?;
        let classifier = rest.split('.').next().unwrap_or(rest);
        (!classifier.is_empty()).then_some(classifier)
    }

    /// The file extension. For Maven-named files this is everything after
    /// the version and classifier, so `lib-1.0.tar.gz` gives `tar.gz`.
    pub fn extension(&self) -> Option<&str> {
        let extension = match self.maven_suffix() {
            Some(rest) => rest.split_once('.').map(|(_, ext)| ext),
            None => self.file.rsplit_once('.').map(|(_, ext)| ext),
        };
        extension.filter(|ext| !ext.is_empty())
    }

    /// Module descriptors rather than payload files.
    pub fn is_metadata(&self) -> bool {
        METADATA_SUFFIXES.iter().any(|s| self.file.ends_with(s))
            || (self.file.starts_with("ivy") && self.file.ends_with(".xml"))
    }

    /// Interprets a path relative to a Maven-layout repository root:
    /// `group/segments/name/version/file`.
    pub fn from_repository_path(relative: &Path) -> Option<Self> {
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        if parts.len() < 4 {
            return None;
        }
        let file = parts[parts.len() - 1];
        let version = parts[parts.len() - 2];
        let name = parts[parts.len() - 3];
        let group = parts[..parts.len() - 3].join(".");
        if !file.starts_with(&format!("{name}-{version}")) {
            return None;
        }
        Some(ArtifactRef::new(ModuleId::new(group, name, version), file))
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.module, self.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_from_repository_path() {
        let path: PathBuf = ["org", "example", "demo-lib", "1.0", "demo-lib-1.0.jar"]
            .iter()
            .collect();
        let artifact = ArtifactRef::from_repository_path(&path).unwrap();
        assert_eq!(artifact.group(), "org.example");
        assert_eq!(artifact.name(), "demo-lib");
        assert_eq!(artifact.version(), "1.0");
        assert_eq!(artifact.file(), "demo-lib-1.0.jar");
        assert_eq!(artifact.to_string(), "org.example:demo-lib:1.0 (demo-lib-1.0.jar)");
    }

    #[test]
    fn test_rejects_non_layout_paths() {
        let short: PathBuf = ["demo-lib", "1.0", "demo-lib-1.0.jar"].iter().collect();
        assert!(ArtifactRef::from_repository_path(&short).is_none());
        let mismatched: PathBuf = ["org", "demo-lib", "1.0", "other-1.0.jar"].iter().collect();
        assert!(ArtifactRef::from_repository_path(&mismatched).is_none());
    }

    #[test]
    fn test_classifier_and_extension() {
        let module = ModuleId::new("org.example", "demo-lib", "1.0");
        let plain = ArtifactRef::new(module.clone(), "demo-lib-1.0.jar");
        assert_eq!(plain.classifier(), None);
        assert_eq!(plain.extension(), Some("jar"));
        let sources = ArtifactRef::new(module.clone(), "demo-lib-1.0-sources.jar");
        assert_eq!(sources.classifier(), Some("sources"));
        assert_eq!(sources.extension(), Some("jar"));
        let archive = ArtifactRef::new(module.clone(), "demo-lib-1.0-dist.tar.gz");
        assert_eq!(archive.classifier(), Some("dist"));
        assert_eq!(archive.extension(), Some("tar.gz"));
        let ivy = ArtifactRef::new(module.clone(), "ivy-1.0.xml");
        assert_eq!(ivy.classifier(), None);
        assert_eq!(ivy.extension(), Some("xml"));
        let bare = ArtifactRef::new(module, "demo-lib-1.0");
        assert_eq!(bare.classifier(), None);
        assert_eq!(bare.extension(), None);
    }

    #[test]
    fn test_metadata_detection() {
        let module = ModuleId::new("g", "n", "1");
        assert!(ArtifactRef::new(module.clone(), "n-1.pom").is_metadata());
        assert!(ArtifactRef::new(module.clone(), "n-1.module").is_metadata());
        assert!(!ArtifactRef::new(module.clone(), "n-1.jar").is_metadata());
        assert!(!ArtifactRef::new(module, "n-1-sources.jar").is_metadata());
    }

    #[test]
    fn test_ordering() {
        let a = ArtifactRef::new(ModuleId::new("a", "x", "1"), "x-1.jar");
        let b = ArtifactRef::new(ModuleId::new("a", "x", "1"), "x-1.pom");
        let c = ArtifactRef::new(ModuleId::new("b", "a", "0"), "a-0.jar");
        let mut refs = vec![c.clone(), b.clone(), a.clone()];
        refs.sort();
        assert_eq!(refs, vec![a, b, c]);
    }
}
