use fedsecrets_core::TargetKind;
use serde::Serialize;
use tinytemplate::TinyTemplate;

use crate::auth::{SIGNOUT_PATH, UserSession};
use crate::error::AppError;
use crate::models::{LookupResult, OutcomeBody};

const INDEX_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Federated secrets</title>
</head>
<body>
<header>
<p>Signed in as <strong>{user}</strong>{{ if username }} ({username}){{ endif }} | <a href="{signout}">Sign out</a></p>
</header>
<main>
<h1>Secrets read through managed identity federation</h1>
{{ for result in results }}<section id="{result.id}">
<h2>{result.label}</h2>
{{ if result.ok }}<p>Secret <code>{result.name}</code>{{ if result.version }} (version <code>{result.version}</code>){{ endif }}</p>
<pre>{result.value}</pre>
{{ else }}<p class="{result.status}">{result.message}</p>
{{ endif }}</section>
{{ endfor }}</main>
</body>
</html>
"#;

#[derive(Serialize)]
struct PageContext<'a> {
    user: &'a str,
    username: Option<&'a str>,
    signout: &'a str,
    results: Vec<ResultView>,
}

#[derive(Serialize)]
struct ResultView {
    id: &'static str,
    label: &'static str,
    ok: bool,
    status: &'static str,
    name: String,
    version: Option<String>,
    value: String,
    message: String,
}

impl ResultView {
    fn new(kind: TargetKind, result: &LookupResult) -> Self {
        let (id, label) = match kind {
            TargetKind::SameTenant => ("same-tenant", "Secret from a vault in the same tenant"),
            TargetKind::CrossTenant => ("cross-tenant", "Secret from a vault in another tenant"),
        };
        let mut view = Self {
            id,
            label,
            ok: false,
            status: "",
            name: String::new(),
            version: None,
            value: String::new(),
            message: String::new(),
        };
        match OutcomeBody::from(result) {
            OutcomeBody::Ok {
                name,
                value,
                version,
            } => {
                view.ok = true;
                view.status = "ok";
                view.name = name;
                view.value = value;
                view.version = version;
            }
            OutcomeBody::NotSupportedLocally { message } => {
                view.status = "not-supported-locally";
                view.message = message;
            }
            OutcomeBody::Error { kind, message } => {
                view.status = "error";
                view.message = format!("{message} ({kind})");
            }
        }
        view
    }
}

/// Render the signed-in landing page. Values are HTML-escaped.
pub fn render_index(
    session: &UserSession,
    same_tenant: &LookupResult,
    cross_tenant: &LookupResult,
) -> Result<String, AppError> {
    let mut tt = TinyTemplate::new();
    tt.add_template("index", INDEX_TEMPLATE)?;

    let context = PageContext {
        user: &session.name,
        username: session
            .username
            .as_deref()
            .filter(|username| *username != session.name),
        signout: SIGNOUT_PATH,
        results: vec![
            ResultView::new(TargetKind::SameTenant, same_tenant),
            ResultView::new(TargetKind::CrossTenant, cross_tenant),
        ],
    };
    Ok(tt.render("index", &context)?)
}
