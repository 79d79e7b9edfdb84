use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    response::{Html, IntoResponse, Json},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;

use crate::{coingecko, config::Settings};

pub const ROOT_HINT: &str = "Server is up, but try /api/ping for data.";
pub const PING_MESSAGE: &str = "CoinPulse API is live! 🚀";
pub const MARKETS_ERROR: &str = "Could not fetch market data";

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub coingecko: coingecko::Client,
}

pub fn router(state: AppState) -> Result<Router> {
    let origin: HeaderValue = state
        .settings
        .allowed_origin
        .parse()
        .with_context(|| format!("ALLOWED_ORIGIN {}", state.settings.allowed_origin))?;

    // Only the configured origin gets an allow-origin header back.
    let cors = CorsLayer::new()
        .allow_origin([origin])
        .allow_methods([Method::GET, Method::POST])
        .allow_credentials(true);

    Ok(Router::new()
        .route("/", get(index))
        .route("/dashboard", get(dashboard))
        .route("/api/ping", get(api_ping))
        .route("/api/markets", get(api_markets))
        .layer(cors)
        .with_state(state))
}

pub async fn serve(settings: Settings, coingecko: coingecko::Client) -> Result<()> {
    let addr = settings.listen_addr();
    let upstream = coingecko.base_url().to_string();
    let app = router(AppState { settings, coingecko })?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    log::info!(
        "server.start url=http://{} dashboard=http://{}/dashboard upstream={}",
        addr,
        addr,
        upstream
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("server.shutdown signal=ctrl_c");
        })
        .await?;
    Ok(())
}

async fn index() -> &'static str {
    ROOT_HINT
}

async fn api_ping() -> impl IntoResponse {
    Json(serde_json::json!({ "message": PING_MESSAGE }))
}

async fn api_markets(State(st): State<AppState>) -> impl IntoResponse {
    match st.coingecko.top_coins().await {
        Ok(coins) => {
            log::info!("markets.ok count={}", coins.len());
            Json(coins).into_response()
        }
        Err(e) => {
            let status = e
                .status()
                .map(|s| s.as_u16().to_string())
                .unwrap_or_else(|| "-".to_string());
            log::error!("markets.error status={} message={}", status, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": MARKETS_ERROR })),
            )
                .into_response()
        }
    }
}

async fn dashboard(State(st): State<AppState>) -> impl IntoResponse {
    Html(render_dashboard_html(st.settings.poll_interval_secs))
}

fn render_dashboard_html(poll_interval_secs: u64) -> String {
    // Single-file UI (no build step). Same rules as the terminal client in `dashboard`.
    let poll_ms = poll_interval_secs.saturating_mul(1000);
    let placeholder_rows = crate::dashboard::PLACEHOLDER_ROWS;
    let fetch_error = crate::dashboard::FETCH_ERROR;

    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>CoinPulse Terminal</title>
    <style>
      :root {{
        --bg: #020617;
        --panel: rgba(15,23,42,0.5);
        --stroke: rgba(30,41,59,1);
        --text: #e2e8f0;
        --muted: #64748b;
        --good: #34d399;
        --bad: #fb7185;
        --brand: #60a5fa;
        --brand2: #34d399;
      }}
      * {{ box-sizing: border-box; }}
      body {{
        margin: 0;
        font-family: ui-sans-serif, system-ui, -apple-system, Segoe UI, Roboto, Helvetica, Arial;
        color: var(--text);
        background: var(--bg);
      }}
      .wrap {{ max-width: 1024px; margin: 0 auto; padding: 24px; }}
      .topbar {{ display: flex; align-items: center; justify-content: space-between; gap: 16px; margin-bottom: 32px; }}
      .title {{
        font-size: 36px; font-weight: 800;
        background: linear-gradient(90deg, var(--brand), var(--brand2));
        -webkit-background-clip: text; background-clip: text; color: transparent;
      }}
      .subtitle {{ color: var(--muted); margin-top: 4px; }}
      .btn {{
        cursor: pointer; padding: 8px 16px; border-radius: 8px;
        border: 1px solid #334155; background: #1e293b; color: var(--text);
        font-weight: 600; font-size: 14px;
      }}
      .btn:hover {{ background: #334155; }}
      .btn:disabled {{ opacity: 0.5; cursor: default; }}
      .search {{
        width: 100%; margin-bottom: 24px; padding: 12px 16px; border-radius: 12px;
        border: 1px solid var(--stroke); background: var(--panel); color: var(--text); font-size: 15px;
      }}
      .banner {{
        display: none; margin-bottom: 24px; padding: 16px; border-radius: 12px; font-size: 14px;
        color: #f87171; background: rgba(239,68,68,0.10); border: 1px solid rgba(239,68,68,0.20);
      }}
      .card {{ border: 1px solid var(--stroke); border-radius: 16px; background: var(--panel); overflow: hidden; }}
      table {{ width: 100%; border-collapse: collapse; text-align: left; }}
      th {{ padding: 16px 24px; color: #94a3b8; font-size: 12px; text-transform: uppercase; letter-spacing: 0.05em; background: rgba(30,41,59,0.5); }}
      td {{ padding: 16px 24px; border-top: 1px solid var(--stroke); }}
      .right {{ text-align: right; }}
      .mono {{ font-family: ui-monospace, SFMono-Regular, Menlo, Monaco, Consolas, monospace; }}
      .asset {{ display: flex; align-items: center; gap: 12px; }}
      .asset img {{ width: 32px; height: 32px; border-radius: 999px; }}
      .name {{ font-weight: 700; color: #fff; }}
      .sym {{ font-size: 12px; color: var(--muted); }}
      .good {{ color: var(--good); }}
      .bad {{ color: var(--bad); }}
      .flat {{ color: var(--muted); }}
      .placeholder td {{ height: 80px; background: rgba(30,41,59,0.10); }}
      .empty {{ padding: 48px 24px; text-align: center; color: var(--muted); }}
    </style>
  </head>
  <body>
    <div class="wrap">
      <div class="topbar">
        <div>
          <div class="title">CoinPulse Terminal</div>
          <div class="subtitle">Live Market Analytics</div>
        </div>
        <button class="btn" id="refreshBtn">Refresh</button>
      </div>

      <input class="search" id="search" type="text" placeholder="Search by name or symbol..." />

      <div class="banner" id="errBanner"></div>

      <div class="card">
        <table>
          <thead>
            <tr>
              <th>Asset</th>
              <th class="right">Price (USD)</th>
              <th class="right">24h Change</th>
            </tr>
          </thead>
          <tbody id="rows"></tbody>
        </table>
      </div>
    </div>

    <script>
      const POLL_MS = {poll_ms};
      const PLACEHOLDER_ROWS = {placeholder_rows};
      const FETCH_ERROR = "{fetch_error}";

      const state = {{ coins: [], filter: "", loading: false, error: null, ticket: 0 }};

      function escapeHtml(s) {{
        return (s||"").toString().replaceAll("&","&amp;").replaceAll("<","&lt;").replaceAll(">","&gt;").replaceAll('"',"&quot;").replaceAll("'","&#039;");
      }}

      const fmtPrice = (x) => Number(x).toLocaleString("en-US", {{ minimumFractionDigits: 2, maximumFractionDigits: 3 }});

      function fmtChange(x) {{
        if (x === null || x === undefined || !Number.isFinite(Number(x))) {{
          return {{ cls: "flat", text: "--" }};
        }}
        const n = Number(x);
        return {{ cls: n >= 0 ? "good" : "bad", text: (n >= 0 ? "▲ " : "▼ ") + Math.abs(n).toFixed(2) + "%" }};
      }}

      function visible() {{
        const q = state.filter.toLowerCase();
        return state.coins.filter((c) =>
          c.name.toLowerCase().includes(q) || c.symbol.toLowerCase().includes(q));
      }}

      function render() {{
        const btn = document.getElementById("refreshBtn");
        btn.disabled = state.loading;
        btn.textContent = state.loading ? "Syncing..." : "Refresh";

        const banner = document.getElementById("errBanner");
        banner.textContent = state.error ? (state.error + " - Ensure the CoinPulse server is running.") : "";
        banner.style.display = state.error ? "block" : "none";

        const tb = document.getElementById("rows");
        tb.innerHTML = "";
        const rows = visible();
        for (const c of rows) {{
          const ch = fmtChange(c.change24h);
          const tr = document.createElement("tr");
          tr.innerHTML = `
            <td>
              <div class="asset">
                <img src="${{escapeHtml(c.image)}}" alt="${{escapeHtml(c.name)}}" />
                <div>
                  <div class="name">${{escapeHtml(c.name)}}</div>
                  <div class="sym mono">${{escapeHtml(c.symbol)}}</div>
                </div>
              </div>
            </td>
            <td class="right mono">$${{fmtPrice(c.price)}}</td>
            <td class="right ${{ch.cls}}">${{ch.text}}</td>
          `;
          tb.appendChild(tr);
        }}
        if (state.loading && state.coins.length === 0) {{
          for (let i = 0; i < PLACEHOLDER_ROWS; i++) {{
            const tr = document.createElement("tr");
            tr.className = "placeholder";
            tr.innerHTML = `<td colspan="3"></td>`;
            tb.appendChild(tr);
          }}
        }}
        if (!state.loading && rows.length === 0) {{
          const tr = document.createElement("tr");
          tr.innerHTML = `<td colspan="3" class="empty">No assets found matching "${{escapeHtml(state.filter)}}"</td>`;
          tb.appendChild(tr);
        }}
      }}

      // At most one request in flight; overlapping triggers are dropped.
      async function refresh() {{
        if (state.loading) return;
        const ticket = ++state.ticket;
        state.loading = true;
        render();
        try {{
          const r = await fetch("/api/markets", {{ cache: "no-store" }});
          if (!r.ok) throw new Error(`/api/markets -> ${{r.status}}`);
          const coins = await r.json();
          if (ticket !== state.ticket) return;
          state.coins = coins;
          state.error = null;
        }} catch (e) {{
          if (ticket !== state.ticket) return;
          state.error = FETCH_ERROR;
        }} finally {{
          if (ticket === state.ticket) {{
            state.loading = false;
            render();
          }}
        }}
      }}

      document.getElementById("refreshBtn").addEventListener("click", refresh);
      document.getElementById("search").addEventListener("input", (e) => {{
        state.filter = e.target.value;
        render();
      }});
      refresh();
      setInterval(refresh, POLL_MS);
    </script>
  </body>
</html>"#,
        poll_ms = poll_ms,
        placeholder_rows = placeholder_rows,
        fetch_error = fetch_error,
    )
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn settings(base_url: &str) -> Settings {
        Settings {
            host: "127.0.0.1".to_string(),
            port: 0,
            allowed_origin: "http://localhost:5173".to_string(),
            coingecko_base_url: base_url.to_string(),
            coingecko_api_key: None,
            backend_url: "http://127.0.0.1:5000".to_string(),
            poll_interval_secs: 60,
        }
    }

    fn app(base_url: &str) -> Router {
        let s = settings(base_url);
        let coingecko = coingecko::Client::new(&s.coingecko_base_url, None).unwrap();
        router(AppState { settings: s, coingecko }).unwrap()
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn ping_and_root_are_static() {
        let (status, body) = get(app("http://127.0.0.1:9"), "/api/ping").await;
        assert_eq!(status, StatusCode::OK);
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v["message"], PING_MESSAGE);

        let (status, body) = get(app("http://127.0.0.1:9"), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(String::from_utf8(body).unwrap(), ROOT_HINT);
    }

    #[tokio::test]
    async fn markets_forwards_mapped_records_in_provider_order() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[
                  {"id":"bitcoin","symbol":"btc","name":"Bitcoin","image":"https://img.example/btc.png",
                   "current_price":67012.5,"price_change_percentage_24h":1.5},
                  {"id":"ethereum","symbol":"eth","name":"Ethereum","image":"https://img.example/eth.png",
                   "current_price":3501.1,"price_change_percentage_24h":null},
                  {"id":"solana","symbol":"sol","name":"Solana","image":"https://img.example/sol.png",
                   "current_price":150.0,"price_change_percentage_24h":-2.0}
                ]"#,
            ))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (status, body) = get(app(&mock_server.uri()), "/api/markets").await;
        assert_eq!(status, StatusCode::OK);
        let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let rows = v.as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["id"], "bitcoin");
        assert_eq!(rows[0]["symbol"], "BTC");
        assert_eq!(rows[0]["price"], 67012.5);
        assert_eq!(rows[0]["change24h"], 1.5);
        assert_eq!(rows[1]["change24h"], serde_json::Value::Null);
        assert_eq!(rows[2]["symbol"], "SOL");
        assert_eq!(rows[2]["image"], "https://img.example/sol.png");
    }

    #[tokio::test]
    async fn markets_collapses_upstream_errors_to_500() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&mock_server)
            .await;

        for base in [mock_server.uri(), "http://127.0.0.1:9".to_string()] {
            let (status, body) = get(app(&base), "/api/markets").await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            let v: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(v["error"], MARKETS_ERROR);
        }
    }

    #[tokio::test]
    async fn cors_allows_configured_origin_only() {
        let req = Request::builder()
            .uri("/api/ping")
            .header(header::ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .unwrap();
        let resp = app("http://127.0.0.1:9").oneshot(req).await.unwrap();
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:5173"
        );
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );

        let req = Request::builder()
            .uri("/api/ping")
            .header(header::ORIGIN, "http://evil.example")
            .body(Body::empty())
            .unwrap();
        let resp = app("http://127.0.0.1:9").oneshot(req).await.unwrap();
        assert!(resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn dashboard_page_embeds_poll_interval() {
        let (status, body) = get(app("http://127.0.0.1:9"), "/dashboard").await;
        assert_eq!(status, StatusCode::OK);
        let html = String::from_utf8(body).unwrap();
        assert!(html.contains("const POLL_MS = 60000;"));
        assert!(html.contains("/api/markets"));
        assert!(html.contains("No assets found matching"));
    }
}
