use prattle_broker::router::ApiDoc;
use utoipa::OpenApi;

/// Writes the broker's OpenAPI document to a JSON file.
///
/// Takes the output path as an optional first argument, defaulting to
/// `openapi.json` in the working directory.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());
    std::fs::write(&path, ApiDoc::openapi().to_pretty_json()?)?;
    println!("wrote {path}");
    Ok(())
}
