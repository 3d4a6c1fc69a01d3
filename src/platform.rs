use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// OS/architecture pair as written in manifest lists.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: &str, architecture: &str) -> Self {
        Self {
            os: os.to_string(),
            architecture: architecture.to_string(),
            variant: None,
        }
    }

    /// The platform this binary was compiled for, in OCI naming.
    pub fn current() -> Self {
        Self::new(std::env::consts::OS, oci_arch(std::env::consts::ARCH))
    }

    /// Whether `candidate` can run on `self`. A variant only constrains the
    /// match when `self` names one.
    pub fn accepts(&self, candidate: &Platform) -> bool {
        self.os == candidate.os
            && self.architecture == candidate.architecture
            && match &self.variant {
                Some(variant) => candidate.variant.as_ref() == Some(variant),
                None => true,
            }
    }
}

fn oci_arch(rust_arch: &str) -> &str {
    match rust_arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" => "ppc64le",
        "loongarch64" => "loong64",
        other => other,
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [os, arch] if !os.is_empty() && !arch.is_empty() => Ok(Self::new(os, arch)),
            [os, arch, variant] if !os.is_empty() && !arch.is_empty() && !variant.is_empty() => {
                Ok(Self {
                    variant: Some((*variant).to_string()),
                    ..Self::new(os, arch)
                })
            }
            _ => Err(format!("platform '{s}' is not of the form os/arch[/variant]")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_uses_oci_names() {
        let platform = Platform::current();
        assert_eq!(platform.os, std::env::consts::OS);
        assert_ne!(platform.architecture, "x86_64");
        assert_ne!(platform.architecture, "aarch64");
    }

    #[test]
    fn parses_with_and_without_variant() {
        assert_eq!(
            "linux/amd64".parse::<Platform>().unwrap(),
            Platform::new("linux", "amd64")
        );
        let arm: Platform = "linux/arm/v7".parse().unwrap();
        assert_eq!(arm.variant.as_deref(), Some("v7"));
        assert_eq!(arm.to_string(), "linux/arm/v7");
        assert!("linux".parse::<Platform>().is_err());
        assert!("linux//v7".parse::<Platform>().is_err());
    }

    #[test]
    fn variant_only_constrains_when_requested() {
        let arm64_v8 = Platform {
            variant: Some("v8".into()),
            ..Platform::new("linux", "arm64")
        };
        assert!(Platform::new("linux", "arm64").accepts(&arm64_v8));
        assert!(arm64_v8.accepts(&arm64_v8));
        assert!(!arm64_v8.accepts(&Platform::new("linux", "arm64")));
        assert!(!Platform::new("linux", "amd64").accepts(&arm64_v8));
    }
}
