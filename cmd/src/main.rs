use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rszone::dns::name::Name;
use rszone::dns::tsig::{TsigKey, TsigKeyring, ALG_HMAC_SHA1, ALG_HMAC_SHA256};
use rszone::server::{NameServer, ServerConfig};
use rszone::util;
use rszone::zone::loader::{self, ZoneFile};
use rszone::zone::slot::{Catalog, ZoneSlot};

/// Authoritative DNS server over an in-memory zone database.
#[derive(Parser, Debug)]
#[command(name = "rszoned", version, about)]
struct Args {
    /// address and port to listen on (UDP and TCP)
    #[arg(long, default_value = "0.0.0.0:5353")]
    listen: String,

    /// directory of zone seed files, one `<origin>.zone` per zone
    #[arg(long)]
    zones: PathBuf,

    /// EDNS payload size advertised in responses
    #[arg(long, default_value_t = 1232)]
    udp_payload: u16,

    /// TSIG key as `name:algorithm:secret`; repeatable
    #[arg(long = "tsig-key")]
    tsig_keys: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut catalog = Catalog::new();
    for path in util::visit_dirs(&args.zones)
        .with_context(|| format!("reading zone directory {}", args.zones.display()))?
    {
        if path.extension().map(|e| e != "zone").unwrap_or(true) {
            continue;
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .context("zone file name is not valid utf-8")?;
        let origin = Arc::new(
            Name::from_text(&format!("{}.", stem))
                .map_err(|e| anyhow!("zone file name {}: {}", stem, e))?,
        );

        let mut source = ZoneFile::new(path.clone(), origin.clone());
        let mut contents = loader::load_zone(&mut source)?;
        contents
            .adjust()
            .map_err(|e| anyhow!("adjusting {}: {}", origin, e))?;
        info!(zone = %origin, serial = ?contents.serial(), records = contents.node_count(), "zone loaded");
        catalog.insert(Arc::new(ZoneSlot::new(contents)));
    }
    if catalog.is_empty() {
        bail!("no zones loaded from {}", args.zones.display());
    }

    let mut keyring = TsigKeyring::new();
    for spec in &args.tsig_keys {
        keyring.insert(parse_key(spec)?);
    }

    let server = NameServer::new(
        Arc::new(catalog),
        Arc::new(keyring),
        ServerConfig {
            listen: args.listen,
            udp_payload: args.udp_payload,
        },
    );
    server.serve().await
}

fn parse_key(spec: &str) -> Result<TsigKey> {
    let mut parts = spec.splitn(3, ':');
    let (Some(name), Some(algorithm), Some(secret)) = (parts.next(), parts.next(), parts.next())
    else {
        bail!("tsig key spec must be name:algorithm:secret");
    };
    let algorithm = match algorithm {
        "hmac-sha256" => ALG_HMAC_SHA256.clone(),
        "hmac-sha1" => ALG_HMAC_SHA1.clone(),
        other => bail!("unsupported tsig algorithm {}", other),
    };
    Ok(TsigKey {
        name: Arc::new(Name::from_text(&format!(
            "{}.",
            name.trim_end_matches('.')
        ))?),
        algorithm,
        secret: secret.as_bytes().to_vec(),
    })
}
