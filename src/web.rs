use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Html,
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::info;

use crate::models::{Snapshot, SubjectRecord};
use crate::refresh::{Refresh, RefreshCoordinator};

/// Application state shared between handlers
pub struct AppState {
    pub coordinator: Arc<RefreshCoordinator>,
}

/// Create the Axum router with all routes
pub fn create_router(coordinator: Arc<RefreshCoordinator>) -> Router {
    let state = Arc::new(AppState { coordinator });

    Router::new()
        .route("/", get(dashboard))
        .route("/search", get(search))
        .route("/subjects/{id}", get(subject))
        .route("/subjects/{id}/{section}", get(section))
        .with_state(state)
}

/// Start the web server on the given port
pub async fn start_server(router: Router, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        port = port,
        addr = %addr,
        "Web server started"
    );

    axum::serve(listener, router).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    q: String,
}

/// Summary of the published snapshot; never triggers a fetch
async fn dashboard(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(render_dashboard(state.coordinator.snapshot().as_deref()))
}

async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Html<String> {
    let refresh = state.coordinator.ensure_fresh(false).await;
    match &refresh.snapshot {
        Some(snapshot) => Html(render_search(snapshot, &params.q, notice(&refresh))),
        None => Html(render_error("The timetable is unavailable right now")),
    }
}

async fn subject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Html<String> {
    let refresh = state.coordinator.ensure_fresh(false).await;
    let Some(snapshot) = &refresh.snapshot else {
        return Html(render_error("The timetable is unavailable right now"));
    };

    match snapshot.subject(&id) {
        Some(record) => Html(render_subject(&id, record, None, notice(&refresh))),
        None => Html(render_error(&format!("Subject {} not found", id))),
    }
}

async fn section(
    State(state): State<Arc<AppState>>,
    Path((id, section)): Path<(String, String)>,
) -> Html<String> {
    let refresh = state.coordinator.ensure_fresh(false).await;
    let Some(snapshot) = &refresh.snapshot else {
        return Html(render_error("The timetable is unavailable right now"));
    };

    match snapshot.subject(&id) {
        Some(record) if record.section(&section).is_some() => Html(render_subject(
            &id,
            record,
            Some(&section),
            notice(&refresh),
        )),
        _ => Html(render_error(&format!(
            "Section {} of subject {} not found",
            section, id
        ))),
    }
}

fn notice(refresh: &Refresh) -> Option<&'static str> {
    refresh
        .failed()
        .then_some("Refreshing failed; showing the last fetched timetable.")
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{} - EdugateBot</title>
    <link rel="stylesheet" href="https://cdnjs.cloudflare.com/ajax/libs/milligram/1.4.1/milligram.min.css">
    <style>
        body {{ padding: 2rem 0; }}
        nav {{ margin-bottom: 2rem; }}
        table {{ width: 100%; }}
        .count {{ color: #606c76; font-weight: normal; }}
        .notice {{ color: #856404; }}
        .error {{ color: #dc3545; }}
    </style>
</head>
<body>
    <main class="container">
        <h1>EdugateBot Timetable</h1>
        <nav>
            <form action="/search" method="get">
                <input type="text" name="q" placeholder="Subject name">
                <input type="submit" value="Search" class="button-outline">
            </form>
        </nav>
        {}
    </main>
</body>
</html>"#,
        html_escape(title),
        body
    )
}

/// Render the dashboard HTML
fn render_dashboard(snapshot: Option<&Snapshot>) -> String {
    let body = match snapshot {
        Some(snapshot) => format!(
            r#"<h2>Current Timetable</h2>
        <p>{} subjects, {} sections, fetched {}</p>
        <p><a href="/search">Browse all subjects</a></p>"#,
            snapshot.subject_count(),
            snapshot.section_count(),
            snapshot.produced_at.format("%Y-%m-%d %H:%M:%S UTC"),
        ),
        None => r#"<h2>Current Timetable</h2>
        <p>Not fetched yet. Searching or opening a subject fetches it.</p>"#
            .to_string(),
    };
    page("Dashboard", &body)
}

/// Render the search results HTML
fn render_search(snapshot: &Snapshot, query: &str, notice: Option<&str>) -> String {
    let results = snapshot.search_by_name(query);

    let mut rows = String::new();
    for (id, name) in &results {
        rows.push_str(&format!(
            r#"<tr>
                <td><a href="/subjects/{}">{}</a></td>
                <td>{}</td>
            </tr>"#,
            html_escape(id),
            html_escape(id),
            html_escape(name),
        ));
    }

    let body = format!(
        r#"{}<h2>Results for "{}" <span class="count">({} found)</span></h2>
        <table>
            <thead>
                <tr>
                    <th>ID</th>
                    <th>Name</th>
                </tr>
            </thead>
            <tbody>
                {}
            </tbody>
        </table>"#,
        render_notice(notice),
        html_escape(query),
        results.len(),
        rows
    );
    page("Search", &body)
}

/// Render one subject, optionally narrowed to a single section
fn render_subject(
    id: &str,
    record: &SubjectRecord,
    only_section: Option<&str>,
    notice: Option<&str>,
) -> String {
    let mut rows = String::new();
    for (section_id, data) in &record.sections {
        if only_section.is_some_and(|s| s != section_id.as_str()) {
            continue;
        }
        rows.push_str(&format!(
            r#"<tr>
                <td><a href="/subjects/{}/{}">{}</a></td>
                <td>{}</td>
                <td>{}</td>
                <td>{}</td>
                <td>{}</td>
            </tr>"#,
            html_escape(id),
            html_escape(section_id),
            html_escape(section_id),
            html_escape(&data.status),
            html_escape(&data.room),
            html_escape(&data.time),
            html_escape(&data.teacher),
        ));
    }

    let body = format!(
        r#"{}<h2>{} <span class="count">{}</span></h2>
        <table>
            <thead>
                <tr>
                    <th>Section</th>
                    <th>Status</th>
                    <th>Room</th>
                    <th>Time</th>
                    <th>Teacher</th>
                </tr>
            </thead>
            <tbody>
                {}
            </tbody>
        </table>
        <p><a href="/subjects/{}">All sections</a></p>"#,
        render_notice(notice),
        html_escape(record.name().unwrap_or("")),
        html_escape(id),
        rows,
        html_escape(id),
    );
    page(id, &body)
}

fn render_notice(notice: Option<&str>) -> String {
    notice
        .map(|n| format!(r#"<p class="notice">{}</p>"#, html_escape(n)))
        .unwrap_or_default()
}

/// Render an error page
fn render_error(message: &str) -> String {
    page(
        "Error",
        &format!(r#"<p class="error">{}</p>"#, html_escape(message)),
    )
}

/// Simple HTML escaping
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
