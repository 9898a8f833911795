//! HTML pages rendered with Handlebars.

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::error;

use crate::jobs::{Job, JobStatus};
use crate::settings::ConsoleConfig;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Inline notice at the top of a page.
#[derive(Debug, Clone, Serialize)]
pub struct Flash {
    pub ok: bool,
    pub text: String,
}

impl Flash {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            ok: true,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            ok: false,
            text: text.into(),
        }
    }
}

/// One row of the jobs table.
#[derive(Debug, Serialize)]
pub struct JobRow {
    pub id: String,
    pub name: String,
    pub status: JobStatus,
    pub started: String,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            status: job.status,
            started: job.started_at.format(TIME_FORMAT).to_string(),
        }
    }
}

/// Data shared by the form pages.
#[derive(Debug, Serialize)]
pub struct PageContext {
    pub title: String,
    /// Console navigation; off for the mail UI.
    pub console: bool,
    pub cfg: ConsoleConfig,
    pub jobs: Vec<JobRow>,
    pub flash: Option<Flash>,
    pub services: Vec<&'static str>,
    /// Where the compose form posts.
    pub action: String,
}

#[derive(Debug, Serialize)]
struct JobContext<'a> {
    title: String,
    console: bool,
    job: &'a Job,
    command: String,
    running: bool,
    started: String,
    ended: Option<String>,
}

const HEADER: &str = r#"<!doctype html><html><head><meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
{{#if running}}<meta http-equiv="refresh" content="2">{{/if}}
<title>{{title}}</title>
<style>
:root{--card:#0f1a2e;--text:#e6eefc;--muted:#9fb2d1;--accent:#4aa3ff;--bad:#ff6b6b;--ok:#38d996;--border:#22304a}
*{box-sizing:border-box}
body{margin:0;font-family:ui-sans-serif,system-ui,-apple-system,Segoe UI,Roboto,Arial;background:#0b1220;color:var(--text)}
a{color:var(--accent);text-decoration:none}
.container{max-width:1100px;margin:0 auto;padding:24px}
.header{display:flex;align-items:center;justify-content:space-between;margin-bottom:16px}
.h1{font-size:22px;font-weight:700}
.card{background:var(--card);border:1px solid var(--border);border-radius:14px;padding:18px;margin-bottom:12px}
.grid{display:grid;grid-template-columns:1fr 1fr;gap:12px}
.row{margin-bottom:12px}
label{display:block;font-size:12px;color:var(--muted);margin-bottom:6px}
input,textarea,select{width:100%;background:#0b152a;color:var(--text);border:1px solid var(--border);border-radius:10px;padding:10px 12px}
input[type=checkbox]{width:auto}
textarea{min-height:160px}
.actions{display:flex;gap:10px;align-items:center;flex-wrap:wrap}
.btn{background:var(--accent);border:none;color:#06101f;padding:10px 14px;border-radius:10px;font-weight:700;cursor:pointer}
.btn.secondary{background:transparent;border:1px solid var(--border);color:var(--text)}
.badge{padding:8px 10px;border-radius:10px;border:1px solid var(--border);color:var(--muted)}
.flash{margin:12px 0;padding:10px 12px;border-radius:12px;border:1px solid var(--border)}
.flash.ok{color:var(--ok)}
.flash.bad{color:var(--bad)}
.table{width:100%;border-collapse:collapse}
.table th,.table td{border-bottom:1px solid var(--border);padding:8px 6px;text-align:left;font-size:13px}
.small{font-size:12px;color:var(--muted)}
pre{white-space:pre-wrap;background:#071022;border:1px solid var(--border);padding:12px;border-radius:12px}
@media (max-width:920px){.grid{grid-template-columns:1fr}}
</style></head><body><div class="container">
<div class="header">
  <div class="h1">{{title}}</div>
  <div class="actions">
  {{#if console}}
    <a class="badge" href="/">Home</a>
    <a class="badge" href="/settings">Settings</a>
    <a class="badge" href="/ops">Ops</a>
    <a class="badge" href="/sso">SSO</a>
    <a class="badge" href="/backup">Backup</a>
    <a class="badge" href="/mail">Mail / VPN package</a>
  {{else}}
    <a class="badge" href="/">Compose</a>
    <a class="badge" href="/settings">Settings</a>
  {{/if}}
  </div>
</div>
{{#if flash}}<div class="flash {{#if flash.ok}}ok{{else}}bad{{/if}}">{{flash.text}}</div>{{/if}}
"#;

const FOOTER: &str = "</div></body></html>\n";

const JOBS_TABLE: &str = r#"<div class="card">
  <div class="h1" style="font-size:16px">Jobs</div>
  <table class="table">
    <thead><tr><th>ID</th><th>Name</th><th>Status</th><th>Started</th></tr></thead>
    <tbody>
    {{#each jobs}}
      <tr><td><a href="/jobs/{{id}}">{{id}}</a></td><td>{{name}}</td><td>{{status}}</td><td>{{started}}</td></tr>
    {{/each}}
    </tbody>
  </table>
</div>
"#;

const INDEX: &str = r#"{{> header}}
<div class="grid">
  <div class="card">
    <div class="h1" style="font-size:16px">Deploy / reconcile</div>
    <div class="small">Cloud: <b>{{cfg.cloud}}</b> &middot; Env: <b>{{cfg.environment}}</b> &middot; Namespace: <b>{{cfg.namespace}}</b></div>
    <form method="post" action="/run/deploy" style="margin-top:12px">
      <div class="row"><label>Confirmation (type DEPLOY)</label><input name="confirm" placeholder="DEPLOY"></div>
      <button class="btn" type="submit">Run deploy</button>
    </form>
    <form method="post" action="/run/status" style="margin-top:10px">
      <button class="btn secondary" type="submit">Collect status</button>
    </form>
  </div>
  {{> jobs_table}}
</div>
{{> footer}}"#;

const SETTINGS: &str = r#"{{> header}}
<form class="card" method="post" action="/settings">
  {{#if console}}
  <div class="grid">
    <div class="row"><label>Cloud</label><input name="cloud" value="{{cfg.cloud}}"></div>
    <div class="row"><label>Environment</label><input name="environment" value="{{cfg.environment}}"></div>
    <div class="row"><label>Namespace</label><input name="namespace" value="{{cfg.namespace}}"></div>
  </div>
  {{/if}}
  {{> mail_fields}}
  <button class="btn" type="submit">Save</button>
</form>
{{> footer}}"#;

const MAIL_FIELDS: &str = r#"<div class="grid">
  <div class="row"><label>From</label><input name="from" value="{{cfg.from}}"></div>
  <div class="row"><label>To (comma separated)</label><input name="to" value="{{cfg.to}}"></div>
  <div class="row"><label>VPN endpoint</label><input name="vpnEndpoint" value="{{cfg.vpnEndpoint}}"></div>
  <div class="row"><label>VPN port</label><input name="vpnPort" value="{{cfg.vpnPort}}"></div>
</div>
<div class="row"><label>Subject</label><input name="subject" value="{{cfg.subject}}"></div>
<div class="row"><label>Body</label><textarea name="body">{{cfg.body}}</textarea></div>
<div class="row actions">
  <label><input type="checkbox" name="includeCA" {{#if cfg.includeCA}}checked{{/if}}> Attach root CA</label>
  <label><input type="checkbox" name="includeVPN" {{#if cfg.includeVPN}}checked{{/if}}> Attach new VPN peer</label>
</div>
"#;

const MAIL: &str = r#"{{> header}}
<form class="card" method="post" action="{{action}}">
  {{> mail_fields}}
  <button class="btn" type="submit">Send</button>
</form>
{{#if console}}
<form method="post" action="/run/mail-status"><button class="btn secondary" type="submit">Mail status</button></form>
{{/if}}
{{> footer}}"#;

const OPS: &str = r#"{{> header}}
<div class="grid">
  <div class="card">
    <div class="actions">
      <form method="post" action="/run/health"><button class="btn secondary" type="submit">Health</button></form>
      <form method="post" action="/run/diagnose"><button class="btn secondary" type="submit">Diagnose</button></form>
    </div>
    <form method="post" action="/run/fix" style="margin-top:12px">
      <div class="row"><label>Service filter (optional)</label><input name="service"></div>
      <button class="btn" type="submit">Fix failing pods</button>
    </form>
    <form method="post" action="/run/upgrade" style="margin-top:12px">
      <div class="row"><label>Confirmation (type UPGRADE)</label><input name="confirm" placeholder="UPGRADE"></div>
      <button class="btn" type="submit">Upgrade platform features</button>
    </form>
  </div>
  {{> jobs_table}}
</div>
{{> footer}}"#;

const SSO: &str = r#"{{> header}}
<div class="grid">
  <div class="card">
    <div class="actions">
      <form method="post" action="/run/sso-status"><button class="btn secondary" type="submit">Status</button></form>
      <form method="post" action="/run/sso-install"><button class="btn" type="submit">Install</button></form>
      <form method="post" action="/run/sso-integrate-all"><button class="btn" type="submit">Integrate all</button></form>
    </div>
    <form method="post" action="/run/sso-integrate" style="margin-top:12px">
      <div class="row"><label>Service</label>
        <select name="service"><option value=""></option>{{#each services}}<option value="{{this}}">{{this}}</option>{{/each}}</select>
      </div>
      <button class="btn" type="submit">Integrate</button>
    </form>
  </div>
  {{> jobs_table}}
</div>
{{> footer}}"#;

const BACKUP: &str = r#"{{> header}}
<div class="grid">
  <div class="card">
    <form method="post" action="/run/backup-list"><button class="btn secondary" type="submit">List backups</button></form>
    <form method="post" action="/run/backup-create" style="margin-top:12px">
      <div class="row"><label>Name (optional)</label><input name="name"></div>
      <button class="btn" type="submit">Create backup</button>
    </form>
    <form method="post" action="/run/backup-restore" style="margin-top:12px">
      <div class="row"><label>Backup name</label><input name="name"></div>
      <div class="row"><label>Confirmation (type RESTORE)</label><input name="confirm" placeholder="RESTORE"></div>
      <button class="btn" type="submit">Restore</button>
    </form>
  </div>
  {{> jobs_table}}
</div>
{{> footer}}"#;

const JOB: &str = r#"{{> header}}
<div class="card">
  <div class="small">ID: {{job.id}} &middot; Status: <b>{{job.status}}</b> &middot; Started: {{started}}{{#if ended}} &middot; Ended: {{ended}}{{/if}}{{#if job.exit_code includeZero=true}} &middot; Exit: {{job.exit_code}}{{/if}}</div>
  <div class="small">Command: <code>{{command}}</code></div>
  <pre>{{job.output}}</pre>
</div>
{{> footer}}"#;

/// Registered page templates.
pub struct Templates {
    registry: Handlebars<'static>,
}

impl Templates {
    pub fn new() -> Result<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        for (name, source) in [
            ("header", HEADER),
            ("footer", FOOTER),
            ("jobs_table", JOBS_TABLE),
            ("mail_fields", MAIL_FIELDS),
            ("index", INDEX),
            ("settings", SETTINGS),
            ("mail", MAIL),
            ("ops", OPS),
            ("sso", SSO),
            ("backup", BACKUP),
            ("job", JOB),
        ] {
            registry
                .register_template_string(name, source)
                .with_context(|| format!("failed to register template '{name}'"))?;
        }
        Ok(Self { registry })
    }

    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<String> {
        self.registry
            .render(name, data)
            .with_context(|| format!("failed to render '{name}'"))
    }

    /// Render into a response; a template failure is a 500.
    pub fn page<T: Serialize>(&self, name: &str, data: &T) -> Response {
        match self.render(name, data) {
            Ok(html) => Html(html).into_response(),
            Err(e) => {
                error!(template = name, error = %format!("{e:#}"), "Render failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "render failed").into_response()
            }
        }
    }

    pub fn job_page(&self, job: &Job, console: bool) -> Response {
        let context = JobContext {
            title: format!("Job: {}", job.name),
            console,
            job,
            command: job.command_line(),
            running: job.status == JobStatus::Running,
            started: job.started_at.format(TIME_FORMAT).to_string(),
            ended: job.ended_at.map(|t| t.format(TIME_FORMAT).to_string()),
        };
        self.page("job", &context)
    }
}
