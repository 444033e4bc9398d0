//! Calc command - evaluate an arithmetic expression.

use anyhow::Result;
use clap::Args;
use console::style;

use super::Context;
use concierge_domain::tools::evaluate;

/// Arguments for the calc command.
#[derive(Args, Debug)]
pub struct CalcArgs {
    /// Expression to evaluate, e.g. "2 * (3 + 4)" or "sqrt(16) + pi"
    #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
    pub expression: Vec<String>,
}

/// Run the calc command.
pub fn run(args: CalcArgs, ctx: &Context) -> Result<()> {
    let expression = args.expression.join(" ");
    let value = evaluate(&expression)?;

    if ctx.json_output {
        let out = serde_json::json!({ "expression": expression, "value": value });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if ctx.verbose {
        println!("{} = {}", expression, style(format_number(value)).cyan());
    } else {
        println!("{}", format_number(value));
    }
    Ok(())
}

/// Integral values print without a fractional part.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
