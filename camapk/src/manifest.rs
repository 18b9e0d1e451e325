use crate::compiler::Element;
use anyhow::Result;
use serde::Deserialize;

pub const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";

/// Android [manifest element](https://developer.android.com/guide/topics/manifest/manifest-element).
///
/// Only the handful of elements a camera app installer looks at are modelled.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AndroidManifest {
    #[serde(default = "default_package")]
    pub package: String,
    #[serde(default = "default_version_code")]
    pub version_code: u32,
    #[serde(default = "default_version_name")]
    pub version_name: String,
    #[serde(rename = "uses_sdk")]
    #[serde(default)]
    pub sdk: Option<Sdk>,
    #[serde(default)]
    pub application: Option<Application>,
}

impl Default for AndroidManifest {
    fn default() -> Self {
        Self {
            package: default_package(),
            version_code: default_version_code(),
            version_name: default_version_name(),
            sdk: None,
            application: None,
        }
    }
}

impl AndroidManifest {
    pub fn new(package: &str) -> Self {
        Self {
            package: package.to_string(),
            ..Default::default()
        }
    }

    /// Checks that the package is a dotted java package name with at least two segments.
    pub fn validate(&self) -> Result<()> {
        let segments = self.package.split('.').collect::<Vec<_>>();
        anyhow::ensure!(
            segments.len() >= 2,
            "package `{}` needs at least two segments",
            self.package
        );
        anyhow::ensure!(
            segments.into_iter().all(is_java_identifier),
            "invalid package `{}`",
            self.package
        );
        Ok(())
    }

    /// Resolves a class name that starts with `.` against the package.
    pub fn resolve_class(&self, class: &str) -> String {
        if class.starts_with('.') {
            format!("{}{}", self.package, class)
        } else {
            class.to_string()
        }
    }

    pub fn to_element(&self) -> Element {
        let mut manifest = Element::new("manifest")
            .namespace("android", ANDROID_NS)
            .android_attr("versionCode", self.version_code.to_string())
            .android_attr("versionName", &self.version_name)
            .attr("package", &self.package);
        if let Some(sdk) = &self.sdk {
            let mut uses_sdk = Element::new("uses-sdk");
            if let Some(min) = sdk.min_sdk_version {
                uses_sdk = uses_sdk.android_attr("minSdkVersion", min.to_string());
            }
            if let Some(target) = sdk.target_sdk_version {
                uses_sdk = uses_sdk.android_attr("targetSdkVersion", target.to_string());
            }
            manifest = manifest.child(uses_sdk);
        }
        if let Some(application) = &self.application {
            manifest = manifest.child(application.to_element(self));
        }
        manifest
    }
}

/// Android [uses-sdk element](https://developer.android.com/guide/topics/manifest/uses-sdk-element).
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Sdk {
    pub min_sdk_version: Option<u32>,
    pub target_sdk_version: Option<u32>,
}

/// Android [application element](https://developer.android.com/guide/topics/manifest/application-element).
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Application {
    pub label: Option<String>,
    pub has_code: Option<bool>,
    pub debuggable: Option<bool>,
    #[serde(default)]
    pub activities: Vec<Activity>,
}

impl Application {
    fn to_element(&self, manifest: &AndroidManifest) -> Element {
        let mut application = Element::new("application");
        if let Some(label) = &self.label {
            application = application.android_attr("label", label);
        }
        if let Some(has_code) = self.has_code {
            application = application.android_attr("hasCode", has_code.to_string());
        }
        if let Some(debuggable) = self.debuggable {
            application = application.android_attr("debuggable", debuggable.to_string());
        }
        for activity in &self.activities {
            application = application.child(activity.to_element(manifest));
        }
        application
    }
}

/// Android [activity element](https://developer.android.com/guide/topics/manifest/activity-element).
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Activity {
    pub name: String,
    pub label: Option<String>,
    pub exported: Option<bool>,
    #[serde(default)]
    pub intent_filters: Vec<IntentFilter>,
}

impl Activity {
    fn to_element(&self, manifest: &AndroidManifest) -> Element {
        let mut activity =
            Element::new("activity").android_attr("name", manifest.resolve_class(&self.name));
        if let Some(label) = &self.label {
            activity = activity.android_attr("label", label);
        }
        if let Some(exported) = self.exported {
            activity = activity.android_attr("exported", exported.to_string());
        }
        for filter in &self.intent_filters {
            activity = activity.child(filter.to_element());
        }
        activity
    }
}

/// Android [intent filter element](https://developer.android.com/guide/topics/manifest/intent-filter-element).
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct IntentFilter {
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl IntentFilter {
    fn to_element(&self) -> Element {
        let mut filter = Element::new("intent-filter");
        for action in &self.actions {
            filter = filter.child(Element::new("action").android_attr("name", action));
        }
        for category in &self.categories {
            filter = filter.child(Element::new("category").android_attr("name", category));
        }
        filter
    }
}

/// A non-empty ascii identifier that does not start with a digit.
pub fn is_java_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) => {
            (c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn default_package() -> String {
    "com.example.app".to_string()
}

fn default_version_code() -> u32 {
    1
}

fn default_version_name() -> String {
    "1.0".to_string()
}
