//! Status page and server listing.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `GET` | `/api/servers` | Configured upstream servers |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::{Html, IntoResponse};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET / -- minimal HTML status page
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page showing gateway status and API links.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let gateway = &state.gateway;
    let sessions = gateway.bus().session_count();
    let control = gateway.control().current_status();
    let recording = gateway.recorder().status();
    let controller = if control.has_controller { "HELD" } else { "FREE" };
    let recording_state = if recording.is_recording { "RECORDING" } else { "IDLE" };
    let record_count = recording.record_count;

    let server_rows: String = gateway
        .servers()
        .list()
        .iter()
        .map(|server| {
            let link = if server.connected { "connected" } else { "offline" };
            format!(
                "        <li><code>{}</code> {} -- {} ({link})</li>\n",
                server.id, server.name, server.url
            )
        })
        .collect();

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Sensor Gateway</title>
    <style>
        body {{
            background: #0d1117;
            color: #c9d1d9;
            font-family: 'Cascadia Code', 'Fira Code', 'Consolas', monospace;
            padding: 2rem;
            max-width: 800px;
            margin: 0 auto;
        }}
        h1 {{ color: #58a6ff; margin-bottom: 0.25rem; }}
        .subtitle {{ color: #8b949e; margin-top: 0; }}
        .metric {{
            display: inline-block;
            background: #161b22;
            border: 1px solid #30363d;
            border-radius: 6px;
            padding: 1rem 1.5rem;
            margin: 0.5rem 0.5rem 0.5rem 0;
            min-width: 120px;
        }}
        .metric .label {{ color: #8b949e; font-size: 0.85rem; }}
        .metric .value {{ color: #58a6ff; font-size: 1.5rem; font-weight: bold; }}
        a {{ color: #58a6ff; text-decoration: none; }}
        ul {{ list-style: none; padding: 0; }}
        li {{ padding: 0.3rem 0; }}
        hr {{ border: none; border-top: 1px solid #30363d; margin: 1.5rem 0; }}
    </style>
</head>
<body>
    <h1>Sensor Gateway</h1>
    <p class="subtitle">Live sensor monitoring and recording</p>

    <div>
        <div class="metric">
            <div class="label">Sessions</div>
            <div class="value">{sessions}</div>
        </div>
        <div class="metric">
            <div class="label">Control</div>
            <div class="value">{controller}</div>
        </div>
        <div class="metric">
            <div class="label">Recording</div>
            <div class="value">{recording_state}</div>
        </div>
        <div class="metric">
            <div class="label">Records</div>
            <div class="value">{record_count}</div>
        </div>
    </div>

    <hr>

    <h2>Servers</h2>
    <ul>
{server_rows}    </ul>

    <h2>API Endpoints</h2>
    <ul>
        <li><a href="/api/events">/api/events</a> -- SSE push stream</li>
        <li><a href="/api/servers">/api/servers</a> -- Configured servers</li>
        <li><a href="/api/control/status">/api/control/status</a> -- Control state</li>
        <li><a href="/api/recording/status">/api/recording/status</a> -- Recording state</li>
        <li><a href="/api/export/csv">/api/export/csv</a> -- Download recording as CSV</li>
        <li><a href="/api/export/json">/api/export/json</a> -- Download recording as JSON</li>
        <li><a href="/api/export/database">/api/export/database</a> -- Download recording as SQLite</li>
    </ul>
</body>
</html>"#
    ))
}

// ---------------------------------------------------------------------------
// GET /api/servers
// ---------------------------------------------------------------------------

/// List configured upstream servers and their connection state.
pub async fn list_servers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let servers = state.gateway.servers().list();
    Json(serde_json::json!({
        "count": servers.len(),
        "servers": servers,
    }))
}
