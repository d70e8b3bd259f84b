//! # Schema Generator
//!
//! Prints the JSON Schema of the SaaS file bundle format.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin schemagen > schemas/bundle.schema.json
//! ```

use saas_herder::model::Bundle;

fn main() -> anyhow::Result<()> {
    let schema = schemars::schema_for!(Bundle);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
