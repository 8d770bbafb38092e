use std::collections::BTreeMap;

use crate::config::Image;
use crate::context::ReleaseContext;
use crate::platform::BuildInfo;
use crate::template::{self, Scope};

/// Flat key/value snapshot used to render notifications and per-image text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Combine two snapshots. Keys from `overlay` win.
    pub fn merge(&self, overlay: &Params) -> Params {
        let mut merged = self.0.clone();
        merged.extend(overlay.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Params(merged)
    }

    /// Release-wide parameters: environment, project and build platform.
    pub fn from_context(context: &ReleaseContext, build: &BuildInfo) -> Self {
        let env = context.environment();
        let project = &context.config().project;
        let version = context.version().to_string();

        Params::new()
            .with("Environment", &env.name)
            .with("KubernetesCluster", &env.kubernetes.cluster)
            .with("KubernetesZone", &env.kubernetes.zone)
            .with("CloudProject", &env.cloud.project)
            .with("CloudRegistry", &env.cloud.registry)
            .with("BuildUrl", &build.build_url)
            .with("BuildRepository", &build.repository_url)
            .with("BuildPlatform", &build.platform)
            .with("BuildNumber", &build.build_number)
            .with("BuildBranch", &build.branch)
            .with("BuildCommit", &build.commit)
            .with("BuildTag", &build.tag)
            .with("BuildVersion", &version)
            .with("ProjectName", &project.name)
            .with("ProjectDomain", &project.domain)
            .with("ProjectContext", &project.context)
            .with("ProjectVersion", &version)
            .with("ProjectFullName", project.full_name())
    }

    /// Per-image overlay.
    pub fn from_image(image: &Image) -> Self {
        Params::new()
            .with("ImageName", &image.name)
            .with("Dockerfile", image.dockerfile_path().display().to_string())
            .with("BuildContext", &image.build)
    }

    pub fn expand(&self, source: &str) -> Result<String, template::Error> {
        template::expand(source, self)
    }

    /// Like [`Params::expand`], but renders the error message in place of a
    /// broken template. Used where text is informational only.
    pub fn expand_lossy(&self, source: &str) -> String {
        self.expand(source).unwrap_or_else(|err| err.to_string())
    }
}

impl Scope for Params {
    fn field(&self, path: &str) -> Option<String> {
        self.get(path).map(str::to_string)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Params(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::version::Version;

    #[test]
    fn merge_is_the_union_for_disjoint_keys() {
        let a: Params = [("A", "1"), ("B", "2")].into_iter().collect();
        let b: Params = [("C", "3")].into_iter().collect();
        let merged = a.merge(&b);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get("A"), Some("1"));
        assert_eq!(merged.get("C"), Some("3"));
        assert_eq!(merged, b.merge(&a));
    }

    #[test]
    fn merge_prefers_the_overlay() {
        let a: Params = [("Env", "test"), ("Only", "a")].into_iter().collect();
        let b: Params = [("Env", "prod")].into_iter().collect();
        assert_eq!(a.merge(&b).get("Env"), Some("prod"));
        assert_eq!(b.merge(&a).get("Env"), Some("test"));
        assert_ne!(a.merge(&b), b.merge(&a));
        // Inputs are untouched.
        assert_eq!(a.get("Env"), Some("test"));
    }

    #[test]
    fn release_and_image_parameters() {
        let config = Configuration::parse(crate::config::tests::PROJECT_YAML).unwrap();
        let image = config.images[1].clone();
        let context =
            ReleaseContext::new(config, "staging", Version::new("main-4-snapshot")).unwrap();
        let build = BuildInfo {
            platform: "Bitbucket".into(),
            branch: "main".into(),
            build_number: "4".into(),
            ..Default::default()
        };

        let params = Params::from_context(&context, &build).merge(&Params::from_image(&image));
        assert_eq!(params.get("Environment"), Some("staging"));
        assert_eq!(params.get("KubernetesCluster"), Some("main"));
        assert_eq!(params.get("CloudRegistry"), Some("eu.gcr.io"));
        assert_eq!(params.get("ProjectFullName"), Some("acme-web-api"));
        assert_eq!(params.get("BuildVersion"), Some("main-4-snapshot"));
        assert_eq!(params.get("ImageName"), Some("worker"));
        assert_eq!(params.get("Dockerfile"), Some("services/worker/Dockerfile.worker"));

        assert_eq!(
            params.expand("{{ .CloudRegistry }}/{{ .ProjectFullName }}/{{ .ImageName }}:{{ .BuildVersion }}"),
            Ok("eu.gcr.io/acme-web-api/worker:main-4-snapshot".to_string())
        );
        assert_eq!(
            params.expand_lossy("Tag: {{if .BuildTag }}{{ .BuildTag }}{{else}}n/a{{end}}"),
            "Tag: n/a"
        );
    }

    #[test]
    fn lossy_expansion_reports_the_error_inline() {
        let params = Params::new();
        assert_eq!(
            params.expand_lossy("{{ .Nope }}"),
            "template render error at line 1: undefined field .Nope"
        );
    }
}
