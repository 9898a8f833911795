//! Package manager adapter (Helm).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{CeresError, Result};
use crate::process::{args, CommandRunner};

/// One installed release as reported by `helm list -o json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub chart: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub app_version: String,
}

/// Chart repository and release lifecycle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Register a chart repository; an existing repository is success.
    async fn add_repo(&self, name: &str, url: &str) -> Result<()>;

    async fn update_repos(&self) -> Result<()>;

    /// Install a release into `namespace`, creating it; an existing release is success.
    async fn install(
        &self,
        release: &str,
        chart: &str,
        namespace: &str,
        version: Option<String>,
        values: Vec<(String, String)>,
    ) -> Result<()>;

    async fn upgrade_install(
        &self,
        release: &str,
        chart: &str,
        namespace: &str,
        values: Vec<(String, String)>,
    ) -> Result<()>;

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()>;

    async fn list_releases(&self, namespace: &str) -> Result<Vec<Release>>;
}

/// [`PackageManager`] backed by the `helm` binary.
pub struct Helm<R> {
    runner: R,
}

impl<R: CommandRunner> Helm<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    fn push_values(argv: &mut Vec<String>, values: &[(String, String)]) {
        for (key, value) in values {
            argv.push("--set".to_string());
            argv.push(format!("{key}={value}"));
        }
    }
}

fn already_exists(err: &CeresError) -> bool {
    matches!(err, CeresError::CommandFailed { output, .. } if output.contains("already exists"))
}

#[async_trait]
impl<R: CommandRunner> PackageManager for Helm<R> {
    async fn add_repo(&self, name: &str, url: &str) -> Result<()> {
        match self
            .runner
            .run_checked("helm", &args(&["repo", "add", name, url]), None)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if already_exists(&e) => {
                debug!(repo = %name, "Helm repository already present");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn update_repos(&self) -> Result<()> {
        self.runner
            .run_checked("helm", &args(&["repo", "update"]), None)
            .await
            .map(|_| ())
    }

    async fn install(
        &self,
        release: &str,
        chart: &str,
        namespace: &str,
        version: Option<String>,
        values: Vec<(String, String)>,
    ) -> Result<()> {
        let mut argv = args(&[
            "install",
            release,
            chart,
            "-n",
            namespace,
            "--create-namespace",
        ]);
        if let Some(v) = version {
            argv.extend(["--version".to_string(), v]);
        }
        Self::push_values(&mut argv, &values);
        match self.runner.run_checked("helm", &argv, None).await {
            Ok(_) => {
                info!(release = %release, namespace = %namespace, "Helm release installed");
                Ok(())
            }
            Err(e) if already_exists(&e) => {
                debug!(release = %release, "Helm release already installed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn upgrade_install(
        &self,
        release: &str,
        chart: &str,
        namespace: &str,
        values: Vec<(String, String)>,
    ) -> Result<()> {
        let mut argv = args(&[
            "upgrade",
            "--install",
            release,
            chart,
            "-n",
            namespace,
            "--create-namespace",
        ]);
        Self::push_values(&mut argv, &values);
        self.runner.run_checked("helm", &argv, None).await.map(|_| ())
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()> {
        self.runner
            .run_checked("helm", &args(&["uninstall", release, "-n", namespace]), None)
            .await
            .map(|_| ())
    }

    async fn list_releases(&self, namespace: &str) -> Result<Vec<Release>> {
        let out = self
            .runner
            .run_checked("helm", &args(&["list", "-n", namespace, "-o", "json"]), None)
            .await?;
        let text = out.stdout.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::ScriptedRunner;
    use crate::process::CommandOutput;

    #[tokio::test]
    async fn test_install_builds_flags_and_tolerates_existing() {
        let runner = ScriptedRunner::new().on(
            "helm install cert-manager",
            CommandOutput::failed(1, "Error: INSTALLATION FAILED: cannot re-use a name that is still in use: already exists"),
        );
        let helm = Helm::new(runner);
        helm.install(
            "cert-manager",
            "jetstack/cert-manager",
            "cert-manager",
            Some("v1.13.0".into()),
            vec![("installCRDs".into(), "true".into())],
        )
        .await
        .unwrap();

        assert_eq!(
            helm.runner.lines(),
            vec!["helm install cert-manager jetstack/cert-manager -n cert-manager --create-namespace --version v1.13.0 --set installCRDs=true"]
        );
    }

    #[tokio::test]
    async fn test_list_releases_parses_json() {
        let runner = ScriptedRunner::new().on(
            "helm list -n velero -o json",
            CommandOutput::ok(
                r#"[{"name":"velero","namespace":"velero","revision":"1","chart":"velero-5.1.0","status":"deployed","app_version":"1.12.0"}]"#,
            ),
        );
        let helm = Helm::new(runner);
        let releases = helm.list_releases("velero").await.unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].chart, "velero-5.1.0");
        assert_eq!(releases[0].status, "deployed");
    }

    #[tokio::test]
    async fn test_repo_add_failure_propagates() {
        let runner =
            ScriptedRunner::new().on("helm repo add", CommandOutput::failed(1, "network unreachable"));
        let helm = Helm::new(runner);
        let err = helm.add_repo("jetstack", "https://charts.jetstack.io").await.unwrap_err();
        assert!(err.to_string().contains("network unreachable"));
    }
}
