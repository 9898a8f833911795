//! Cluster command adapter.
//!
//! A narrow interface over the cluster CLI: one method per external
//! operation, returning raw text. Interpretation lives in the callers.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{CeresError, Result};
use crate::process::{args, CommandRunner};

/// Output format for `get` queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    /// Default table.
    Table,
    /// `-o wide`.
    Wide,
    /// Table without the header row.
    NoHeaders,
    /// `-o jsonpath=<expr>`.
    JsonPath(String),
    /// `-o json`.
    Json,
}

/// Selection of cluster objects for a `get`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceQuery {
    kind: String,
    name: Option<String>,
    namespace: Option<String>,
    all_namespaces: bool,
    selector: Option<String>,
    field_selector: Option<String>,
}

impl ResourceQuery {
    /// All objects of `kind`.
    #[must_use]
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Self::default()
        }
    }

    /// A single named object.
    #[must_use]
    pub fn named(kind: &str, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::new(kind)
        }
    }

    #[must_use]
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self.all_namespaces = false;
        self
    }

    #[must_use]
    pub fn all_namespaces(mut self) -> Self {
        self.all_namespaces = true;
        self.namespace = None;
        self
    }

    #[must_use]
    pub fn selector(mut self, selector: &str) -> Self {
        self.selector = Some(selector.to_string());
        self
    }

    #[must_use]
    pub fn field_selector(mut self, selector: &str) -> Self {
        self.field_selector = Some(selector.to_string());
        self
    }

    /// Arguments after `kubectl get`.
    #[must_use]
    pub fn to_args(&self, format: &OutputFormat) -> Vec<String> {
        let mut out = vec![self.kind.clone()];
        if let Some(name) = &self.name {
            out.push(name.clone());
        }
        if self.all_namespaces {
            out.push("--all-namespaces".into());
        } else if let Some(ns) = &self.namespace {
            out.push("-n".into());
            out.push(ns.clone());
        }
        if let Some(sel) = &self.selector {
            out.push("-l".into());
            out.push(sel.clone());
        }
        if let Some(fs) = &self.field_selector {
            out.push(format!("--field-selector={fs}"));
        }
        match format {
            OutputFormat::Table => {}
            OutputFormat::Wide => out.extend(["-o".into(), "wide".into()]),
            OutputFormat::NoHeaders => out.push("--no-headers".into()),
            OutputFormat::JsonPath(expr) => {
                out.extend(["-o".into(), format!("jsonpath={expr}")]);
            }
            OutputFormat::Json => out.extend(["-o".into(), "json".into()]),
        }
        out
    }
}

/// Operations the orchestrator and managers need from the cluster.
#[async_trait]
pub trait ClusterAdapter: Send + Sync {
    /// `apply -f <path-or-url>`.
    async fn apply_file(&self, path: &Path) -> Result<String>;

    /// `create -f -`; fails if the object exists.
    async fn create_manifest(&self, manifest: &str) -> Result<String>;

    /// `replace -f -`; honours `metadata.resourceVersion` as a precondition.
    async fn replace_manifest(&self, manifest: &str) -> Result<String>;

    /// Create a namespace; an existing namespace is success.
    async fn create_namespace(&self, name: &str) -> Result<()>;

    /// Delete a namespace without waiting; a missing namespace is success.
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// `get` with the given output format, trimmed.
    async fn get(&self, query: &ResourceQuery, format: OutputFormat) -> Result<String>;

    /// Delete one object; a missing object is success.
    async fn delete(&self, kind: &str, name: &str, namespace: &str) -> Result<()>;

    /// Container logs for `target` (`pod`, `job/x`, `deploy/x`).
    async fn logs(
        &self,
        namespace: &str,
        target: &str,
        container: Option<&str>,
        tail: Option<u32>,
    ) -> Result<String>;

    /// Run `command` inside `target`.
    async fn exec(
        &self,
        namespace: &str,
        target: &str,
        container: Option<&str>,
        command: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<String>;

    /// Copy a local file into a pod.
    async fn copy_to_pod(&self, local: &Path, namespace: &str, pod: &str, remote: &str)
        -> Result<()>;

    /// `cluster-info`.
    async fn cluster_info(&self) -> Result<String>;

    /// `top nodes`; requires metrics-server.
    async fn top_nodes(&self) -> Result<String>;

    /// `get ... -o jsonpath=<expr>`.
    async fn get_jsonpath(&self, query: &ResourceQuery, jsonpath: &str) -> Result<String> {
        self.get(query, OutputFormat::JsonPath(jsonpath.to_string()))
            .await
    }

    /// `get ... -o json` parsed.
    async fn get_json(&self, query: &ResourceQuery) -> Result<serde_json::Value> {
        let text = self.get(query, OutputFormat::Json).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Shared handle used across managers.
pub type SharedCluster = Arc<dyn ClusterAdapter>;

/// [`ClusterAdapter`] backed by the `kubectl` binary.
pub struct Kubectl<R> {
    runner: R,
    binary: String,
}

impl<R: CommandRunner> Kubectl<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            binary: "kubectl".to_string(),
        }
    }

    async fn run(&self, argv: Vec<String>, stdin: Option<&[u8]>) -> Result<String> {
        debug!(args = ?argv, "kubectl");
        let output = self.runner.run_checked(&self.binary, &argv, stdin).await?;
        Ok(output.stdout.trim().to_string())
    }
}

#[async_trait]
impl<R: CommandRunner> ClusterAdapter for Kubectl<R> {
    async fn apply_file(&self, path: &Path) -> Result<String> {
        self.run(args(&["apply", "-f", &path.to_string_lossy()]), None)
            .await
    }

    async fn create_manifest(&self, manifest: &str) -> Result<String> {
        self.run(args(&["create", "-f", "-"]), Some(manifest.as_bytes()))
            .await
    }

    async fn replace_manifest(&self, manifest: &str) -> Result<String> {
        self.run(args(&["replace", "-f", "-"]), Some(manifest.as_bytes()))
            .await
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        match self.run(args(&["create", "namespace", name]), None).await {
            Ok(_) => Ok(()),
            Err(CeresError::CommandFailed { output, .. }) if output.contains("AlreadyExists") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.run(
            args(&["delete", "namespace", name, "--ignore-not-found", "--wait=false"]),
            None,
        )
        .await
        .map(|_| ())
    }

    async fn get(&self, query: &ResourceQuery, format: OutputFormat) -> Result<String> {
        let mut argv = vec!["get".to_string()];
        argv.extend(query.to_args(&format));
        self.run(argv, None).await
    }

    async fn delete(&self, kind: &str, name: &str, namespace: &str) -> Result<()> {
        self.run(
            args(&["delete", kind, name, "-n", namespace, "--ignore-not-found"]),
            None,
        )
        .await
        .map(|_| ())
    }

    async fn logs(
        &self,
        namespace: &str,
        target: &str,
        container: Option<&str>,
        tail: Option<u32>,
    ) -> Result<String> {
        let mut argv = args(&["logs", "-n", namespace, target]);
        if let Some(c) = container {
            argv.extend(["-c".to_string(), c.to_string()]);
        }
        if let Some(n) = tail {
            argv.push(format!("--tail={n}"));
        }
        self.run(argv, None).await
    }

    async fn exec(
        &self,
        namespace: &str,
        target: &str,
        container: Option<&str>,
        command: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<String> {
        let mut argv = vec!["exec".to_string()];
        if stdin.is_some() {
            argv.push("-i".to_string());
        }
        argv.extend(args(&["-n", namespace, target]));
        if let Some(c) = container {
            argv.extend(["-c".to_string(), c.to_string()]);
        }
        argv.push("--".to_string());
        argv.extend(command.iter().cloned());
        self.run(argv, stdin).await
    }

    async fn copy_to_pod(
        &self,
        local: &Path,
        namespace: &str,
        pod: &str,
        remote: &str,
    ) -> Result<()> {
        self.run(
            args(&[
                "cp",
                &local.to_string_lossy(),
                &format!("{namespace}/{pod}:{remote}"),
            ]),
            None,
        )
        .await
        .map(|_| ())
    }

    async fn cluster_info(&self) -> Result<String> {
        self.run(args(&["cluster-info"]), None).await
    }

    async fn top_nodes(&self) -> Result<String> {
        self.run(args(&["top", "nodes"]), None).await
    }
}
