//! `diagnose`: static checks on a server URL. Never opens a socket.

use stationlink_config::{UrlDiagnosis, diagnose_url};

use super::Context;
use crate::cli::DiagnoseArgs;
use crate::error::CliError;
use crate::output;

fn report(d: &UrlDiagnosis) -> String {
    let mut pairs = vec![
        ("URL", d.url.clone()),
        ("Scheme", d.scheme.clone()),
        ("TLS", if d.secure { "yes" } else { "no" }.to_owned()),
        ("Host", d.host.clone()),
        ("Port", d.port.map_or_else(|| "default".to_owned(), |p| p.to_string())),
        ("Plant network", if d.private_network { "yes" } else { "no" }.to_owned()),
    ];
    if d.warnings.is_empty() {
        pairs.push(("Warnings", "none".to_owned()));
    }
    let mut out = output::detail(&pairs);
    for warning in &d.warnings {
        out.push_str("\n  ! ");
        out.push_str(warning);
    }
    out
}

pub fn handle(args: &DiagnoseArgs, ctx: &Context) -> Result<(), CliError> {
    let raw = args.url.as_deref().unwrap_or(&ctx.config.server.url);
    let diagnosis = diagnose_url(raw)?;
    let rendered = output::render_single(ctx.output, &diagnosis, report, |d| d.warnings.join("\n"))?;
    ctx.print(&rendered);
    Ok(())
}
