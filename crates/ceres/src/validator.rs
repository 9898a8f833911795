use std::ffi::OsString;
use std::path::PathBuf;

use colored::Colorize;

use crate::cluster::SharedCluster;
use crate::config::PlatformConfig;
use crate::error::{CeresError, Result};
use crate::ui;

enum Check {
    /// Executable on the search path.
    Binary(&'static str),
    ClusterReachable,
    PlatformConfig(PathBuf),
}

struct Requirement {
    name: String,
    check: Check,
    install_instructions: String,
    critical: bool,
}

/// Outcome of a validation run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub passed: Vec<String>,
    pub failed_critical: Vec<String>,
    pub failed_optional: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn ok(&self) -> bool {
        self.failed_critical.is_empty()
    }
}

/// Validates prerequisites for running Ceres against a cluster.
pub struct PrerequisitesValidator {
    cluster: SharedCluster,
    requirements: Vec<Requirement>,
    search_path: Option<OsString>,
}

impl PrerequisitesValidator {
    pub fn new(cluster: SharedCluster, config_path: PathBuf) -> Self {
        let requirements = vec![
            Requirement {
                name: "kubectl".to_string(),
                check: Check::Binary("kubectl"),
                install_instructions: "Install kubectl from https://kubernetes.io/docs/tasks/tools/"
                    .to_string(),
                critical: true,
            },
            Requirement {
                name: "Helm".to_string(),
                check: Check::Binary("helm"),
                install_instructions: "Install Helm from https://helm.sh/docs/intro/install/"
                    .to_string(),
                critical: true,
            },
            Requirement {
                name: "WireGuard".to_string(),
                check: Check::Binary("wg"),
                install_instructions: "Install wireguard-tools to use `ceres vpn`".to_string(),
                critical: false,
            },
            Requirement {
                name: "Cluster access".to_string(),
                check: Check::ClusterReachable,
                install_instructions: "Check KUBECONFIG and that `kubectl cluster-info` succeeds"
                    .to_string(),
                critical: true,
            },
            Requirement {
                name: "Platform config".to_string(),
                check: Check::PlatformConfig(config_path.clone()),
                install_instructions: format!(
                    "Fix {} (see `ceres config validate`)",
                    config_path.display()
                ),
                critical: true,
            },
        ];
        Self {
            cluster,
            requirements,
            search_path: None,
        }
    }

    /// Look binaries up in `paths` instead of `PATH`.
    #[must_use]
    pub fn with_search_path(mut self, paths: impl Into<OsString>) -> Self {
        self.search_path = Some(paths.into());
        self
    }

    fn binary_present(&self, name: &str) -> bool {
        match &self.search_path {
            Some(paths) => std::env::current_dir()
                .ok()
                .and_then(|cwd| which::which_in(name, Some(paths), cwd).ok())
                .is_some(),
            None => which::which(name).is_ok(),
        }
    }

    async fn passes(&self, check: &Check) -> bool {
        match check {
            Check::Binary(name) => self.binary_present(name),
            Check::ClusterReachable => self.cluster.cluster_info().await.is_ok(),
            Check::PlatformConfig(path) => {
                PlatformConfig::load(path).is_ok_and(|config| config.validate().is_ok())
            }
        }
    }

    /// Check every requirement. Fails when a critical one is missing unless
    /// `check_only` is set.
    pub async fn validate(&self, check_only: bool) -> Result<ValidationReport> {
        println!();
        let mut report = ValidationReport::default();
        let mut failures = Vec::new();

        for requirement in &self.requirements {
            if self.passes(&requirement.check).await {
                ui::print_check_result(&requirement.name, true, None);
                report.passed.push(requirement.name.clone());
            } else {
                ui::print_check_result(&requirement.name, false, None);
                if requirement.critical {
                    report.failed_critical.push(requirement.name.clone());
                } else {
                    report.failed_optional.push(requirement.name.clone());
                }
                failures.push(requirement);
            }
        }

        println!();
        if failures.is_empty() {
            ui::print_success("All prerequisites met!");
            return Ok(report);
        }

        ui::print_warning("Some prerequisites are not met:");
        println!();
        for failure in &failures {
            if failure.critical {
                println!(
                    "  {} {} - {}",
                    "✗".red(),
                    failure.name.red(),
                    failure.install_instructions.bright_black()
                );
            } else {
                println!(
                    "  {} {} - {}",
                    "⚠".yellow(),
                    failure.name.yellow(),
                    failure.install_instructions.bright_black()
                );
            }
        }
        println!();

        if !check_only && !report.ok() {
            return Err(CeresError::Validation(format!(
                "critical prerequisites not met: {}",
                report.failed_critical.join(", ")
            )));
        }
        Ok(report)
    }
}
