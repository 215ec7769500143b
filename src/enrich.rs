//! Autonomous-system name enrichment
//!
//! Ingestion only sees AS numbers; names arrive later from PeeringDB,
//! with the Spamhaus ASN-DROP list as a fallback that also tags networks
//! nobody should be routing. Failures here degrade to warnings: a missing
//! name never blocks ingestion or reporting.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::db::Database;

const PEERINGDB_URL: &str = "https://www.peeringdb.com/api/as_set";
const SPAMHAUS_DROP_URL: &str = "https://www.spamhaus.org/drop/asndrop.json";

/// Fill in names for every AS number that does not have one yet.
pub async fn asn_catchup(db: &Database) -> Result<()> {
    let asns = db.unnamed_asns().await?;
    if asns.is_empty() {
        info!("ASN table up to date");
        return Ok(());
    }
    info!("looking up {} unnamed ASNs", asns.len());

    let client = Arc::new(reqwest::Client::new());
    let mut lookups = JoinSet::new();
    for asn in asns {
        let client = client.clone();
        lookups.spawn(async move { (asn, peeringdb_name(&client, asn).await) });
    }

    let mut unknown: Vec<u32> = Vec::new();
    while let Some(joined) = lookups.join_next().await {
        let (asn, result) = joined.context("ASN lookup task failed")?;
        match result {
            Ok(name) => db.set_asn_name(asn, &name, None).await?,
            Err(err) => {
                warn!("could not get a name for AS{asn} from PeeringDB: {err}");
                unknown.push(asn);
            }
        }
    }
    if unknown.is_empty() {
        return Ok(());
    }

    // Whatever PeeringDB doesn't know may still be on the DROP list.
    let drop_list = spamhaus_droplist(&client)
        .await
        .context("could not fetch Spamhaus ASN-DROP list")?;
    for asn in unknown {
        if let Some(name) = drop_list.get(&asn) {
            db.set_asn_name(asn, name, Some("spamhaus")).await?;
        }
    }

    Ok(())
}

/// Ask PeeringDB for the name of one ASN.
async fn peeringdb_name(client: &reqwest::Client, asn: u32) -> Result<String> {
    // "list as-set by asn": https://www.peeringdb.com/apidocs/
    #[derive(serde::Deserialize)]
    struct AsnResponse {
        data: Vec<HashMap<String, String>>,
    }

    let response = client
        .get(format!("{PEERINGDB_URL}/{asn}"))
        .send()
        .await
        .with_context(|| format!("failed HTTP request for AS{asn}"))?;
    if !response.status().is_success() {
        return Err(anyhow!("HTTP status {} for AS{asn}", response.status()));
    }
    let body: AsnResponse = response
        .json()
        .await
        .with_context(|| format!("undecodable response for AS{asn}"))?;

    let key = asn.to_string();
    body.data
        .into_iter()
        .flatten()
        .find(|(found, _)| found == &key)
        .map(|(_, name)| name)
        .ok_or_else(|| anyhow!("no PeeringDB entry for AS{asn}"))
}

/// Fetch the Spamhaus "don't route or peer" ASN list.
async fn spamhaus_droplist(client: &reqwest::Client) -> Result<HashMap<u32, String>> {
    // Line-delimited JSON: entries, plus one metadata object whose
    // copyright line Spamhaus asks consumers to surface.
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum DropLine {
        Entry { asn: u32, asname: String },
        Metadata { copyright: String },
    }

    let response = client
        .get(SPAMHAUS_DROP_URL)
        .send()
        .await
        .context("failed HTTP request for ASN-DROP")?;
    if !response.status().is_success() {
        return Err(anyhow!("HTTP status {} for ASN-DROP", response.status()));
    }
    let body = response
        .bytes()
        .await
        .context("could not download ASN-DROP body")?;

    let mut entries = HashMap::new();
    for line in serde_json::Deserializer::from_slice(&body).into_iter::<DropLine>() {
        match line.context("undecodable ASN-DROP line")? {
            DropLine::Entry { asn, asname } => {
                entries.insert(asn, asname);
            }
            DropLine::Metadata { copyright } => {
                info!("using data from Spamhaus: {copyright}");
            }
        }
    }
    Ok(entries)
}
