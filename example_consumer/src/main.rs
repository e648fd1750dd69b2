//! Example consumer: runs a single action and prints the response envelope.
//!
//! Run from repo root: `cargo run -p example-consumer -- getPost '{"id": "p1"}'`
//!
//! Reads `DATABASE_URL`, `ACTIONS_SCHEMA` (path to the compiled schema JSON) and, when
//! set, `ACTIONS_IDENTITY` as the caller's identity id.

use action_runtime::{AppState, Identity, RequestContext, RuntimeConfig, Schema};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("action_runtime=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let action = args.next().ok_or("usage: example-consumer <action> [json input]")?;
    let input: serde_json::Value = match args.next() {
        Some(text) => serde_json::from_str(&text)?,
        None => serde_json::Value::Null,
    };

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/actions".into());
    let schema_path = std::env::var("ACTIONS_SCHEMA").unwrap_or_else(|_| "schema.json".into());
    let schema = Schema::from_path(&schema_path).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let state = AppState::new(pool, schema, RuntimeConfig::from_env());
    let ctx = match std::env::var("ACTIONS_IDENTITY") {
        Ok(id) => RequestContext::authenticated(Identity { id, email: None }),
        Err(_) => RequestContext::anonymous(),
    };
    let body = state.respond(&ctx, &action, &input).await;
    tracing::info!(action = %action, "done");
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
