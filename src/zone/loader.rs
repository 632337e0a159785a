/*!
Zone seeding.  The surrounding system owns real zone-file parsing;
this module is the seam it plugs into, plus a line-oriented reader
good enough to bootstrap a zone from disk: one record per line,
`owner ttl class type rdata`, `;` comments, `@` for the origin,
names without a trailing dot taken relative to the origin.

The contract mirrors the publish path: a source hands over records,
`load_zone` builds un-adjusted contents, and whoever publishes runs
the adjust pass first.
*/

use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};

use super::contents::ZoneContents;
use crate::dns::name::Name;
use crate::dns::rdata::Rdata;
use crate::dns::rrset::Rr;
use crate::dns::{
    Type, CLASS_IN, TYPE_A, TYPE_AAAA, TYPE_CNAME, TYPE_MX, TYPE_NS, TYPE_PTR, TYPE_SOA, TYPE_TXT,
};

/// Where a zone's records come from.
pub trait ZoneSource {
    fn origin(&self) -> &Arc<Name>;

    /// Produce the full record set of the zone.
    fn load(&mut self) -> Result<Vec<Rr>>;
}

/// A seed file on disk.
pub struct ZoneFile {
    path: PathBuf,
    origin: Arc<Name>,
}

impl ZoneFile {
    pub fn new(path: impl Into<PathBuf>, origin: Arc<Name>) -> Self {
        ZoneFile {
            path: path.into(),
            origin,
        }
    }
}

impl ZoneSource for ZoneFile {
    fn origin(&self) -> &Arc<Name> {
        &self.origin
    }

    fn load(&mut self) -> Result<Vec<Rr>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("reading zone file {}", self.path.display()))?;
        let mut rrs = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            match parse_line(line, &self.origin)
                .with_context(|| format!("{}:{}", self.path.display(), lineno + 1))?
            {
                Some(rr) => rrs.push(rr),
                None => continue,
            }
        }
        Ok(rrs)
    }
}

/// Build un-adjusted contents from a source; the publisher adjusts.
pub fn load_zone(source: &mut dyn ZoneSource) -> Result<ZoneContents> {
    let mut contents = ZoneContents::new(source.origin().clone());
    for rr in source.load()? {
        contents
            .insert_rr(rr)
            .map_err(|e| anyhow!("inserting record: {}", e))?;
    }
    Ok(contents)
}

fn parse_line(line: &str, origin: &Arc<Name>) -> Result<Option<Rr>> {
    let line = match line.split(';').next() {
        Some(data) => data.trim(),
        None => "",
    };
    if line.is_empty() {
        return Ok(None);
    }

    let mut fields = line.split_whitespace();
    let owner_text = fields.next().ok_or_else(|| anyhow!("missing owner"))?;
    let ttl: u32 = fields
        .next()
        .ok_or_else(|| anyhow!("missing ttl"))?
        .parse()
        .context("bad ttl")?;
    let class_text = fields.next().ok_or_else(|| anyhow!("missing class"))?;
    if !class_text.eq_ignore_ascii_case("IN") {
        bail!("unsupported class {}", class_text);
    }
    let type_text = fields.next().ok_or_else(|| anyhow!("missing type"))?;
    let rest: Vec<&str> = fields.collect();

    let owner = resolve_name(owner_text, origin)?;
    let (rtype, rdata) = parse_rdata(type_text, &rest, origin)?;

    Ok(Some(Rr {
        owner,
        rtype,
        class: CLASS_IN,
        ttl,
        rdata,
    }))
}

fn resolve_name(text: &str, origin: &Arc<Name>) -> Result<Arc<Name>> {
    if text == "@" {
        return Ok(origin.clone());
    }
    let name = Name::from_text(text).map_err(|e| anyhow!("bad name {}: {}", text, e))?;
    if text.ends_with('.') {
        Ok(Arc::new(name))
    } else {
        Ok(Arc::new(
            Name::concat(&name, origin).map_err(|e| anyhow!("bad name {}: {}", text, e))?,
        ))
    }
}

fn parse_rdata(type_text: &str, rest: &[&str], origin: &Arc<Name>) -> Result<(Type, Rdata)> {
    let field = |at: usize| -> Result<&str> {
        rest.get(at)
            .copied()
            .ok_or_else(|| anyhow!("missing rdata field {}", at + 1))
    };

    match type_text.to_ascii_uppercase().as_str() {
        "A" => {
            let addr = Ipv4Addr::from_str(field(0)?).context("bad ipv4 address")?;
            Ok((TYPE_A, Rdata::from(addr)))
        }
        "AAAA" => {
            let addr = Ipv6Addr::from_str(field(0)?).context("bad ipv6 address")?;
            Ok((TYPE_AAAA, Rdata::from(addr)))
        }
        "NS" | "CNAME" | "PTR" => {
            let rtype = match type_text.to_ascii_uppercase().as_str() {
                "NS" => TYPE_NS,
                "CNAME" => TYPE_CNAME,
                _ => TYPE_PTR,
            };
            let target = resolve_name(field(0)?, origin)?;
            let rdata = Rdata::parse(rtype, target.wire())?;
            Ok((rtype, rdata))
        }
        "MX" => {
            let preference: u16 = field(0)?.parse().context("bad mx preference")?;
            let target = resolve_name(field(1)?, origin)?;
            let mut wire = preference.to_be_bytes().to_vec();
            wire.extend_from_slice(target.wire());
            Ok((TYPE_MX, Rdata::parse(TYPE_MX, &wire)?))
        }
        "TXT" => {
            let text = rest.join(" ");
            let text = text.trim_matches('"');
            if text.len() > 255 {
                bail!("txt string exceeds 255 octets");
            }
            let mut wire = vec![text.len() as u8];
            wire.extend_from_slice(text.as_bytes());
            Ok((TYPE_TXT, Rdata::parse(TYPE_TXT, &wire)?))
        }
        "SOA" => {
            let mname = resolve_name(field(0)?, origin)?;
            let rname = resolve_name(field(1)?, origin)?;
            let mut wire = Vec::new();
            wire.extend_from_slice(mname.wire());
            wire.extend_from_slice(rname.wire());
            for at in 2..7 {
                let v: u32 = field(at)?.parse().context("bad soa counter")?;
                wire.extend_from_slice(&v.to_be_bytes());
            }
            Ok((TYPE_SOA, Rdata::parse(TYPE_SOA, &wire)?))
        }
        other => bail!("unsupported record type {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::TYPE_SOA;

    fn origin() -> Arc<Name> {
        Arc::new(Name::from_text("example.com.").unwrap())
    }

    #[test]
    fn test_parse_line_a_record() {
        let rr = parse_line("www 300 IN A 192.0.2.1", &origin())
            .unwrap()
            .unwrap();
        assert_eq!("www.example.com.", rr.owner.to_string());
        assert_eq!(TYPE_A, rr.rtype);
        assert_eq!(&[192, 0, 2, 1], rr.rdata.wire());
    }

    #[test]
    fn test_parse_line_origin_and_comments() {
        assert!(parse_line("; a comment", &origin()).unwrap().is_none());
        assert!(parse_line("", &origin()).unwrap().is_none());

        let rr = parse_line(
            "@ 3600 IN SOA ns1 admin 1 7200 3600 1209600 300 ; apex",
            &origin(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(TYPE_SOA, rr.rtype);
        assert_eq!(rr.owner, origin());
        assert_eq!("ns1.example.com.", rr.rdata.dnames()[0].to_string());
    }

    #[test]
    fn test_parse_line_rejects_garbage() {
        assert!(parse_line("www 300 IN A not-an-address", &origin()).is_err());
        assert!(parse_line("www 300 CH A 192.0.2.1", &origin()).is_err());
        assert!(parse_line("www 300 IN WKS 1 2 3", &origin()).is_err());
    }
}
