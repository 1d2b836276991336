use anyhow::Result;

use super::Context;

pub fn run(ctx: &Context) -> Result<()> {
    let registry = ctx.config.schema_registry();
    println!("{}", serde_json::to_string_pretty(&registry.describe())?);
    Ok(())
}
