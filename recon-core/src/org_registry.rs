use crate::config::OrgRegistryConfig;
use crate::fetch::{safe_url_label, user_agent};
use crate::matcher::{self, Keywords};
use crate::parser::Block;
use crate::sink::{MatchResult, ResultSender};
use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

pub const ARIN_SOURCE: &str = "ARIN";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrgSearchSummary {
  pub organizations: usize,
  pub networks: usize,
  pub matches: usize,
  pub failures: usize,
}

/// A registry searched through its live query interface rather than a
/// cached dump.
pub trait OrgRegistry: Send + Sync {
  fn name(&self) -> &str;

  fn search(
    &self,
    keywords: &Keywords,
    strict: bool,
    sink: &ResultSender,
  ) -> anyhow::Result<OrgSearchSummary>;
}

#[derive(Debug, Clone)]
pub struct OrgRef {
  pub handle: String,
  pub name: String,
}

#[derive(Debug, Clone)]
pub struct NetRef {
  pub handle: String,
  pub start: String,
  pub end: String,
}

/// ARIN Whois-RWS client: organizations by name, then each organization's
/// networks.
pub struct ArinClient {
  client: Client,
  base: String,
}

impl ArinClient {
  pub fn new(cfg: &OrgRegistryConfig) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(cfg.timeout_seconds))
      .build()
      .context("build registry HTTP client")?;
    Ok(Self {
      client,
      base: cfg.base_url.trim_end_matches('/').to_string(),
    })
  }

  pub fn find_orgs(&self, keyword: &str) -> anyhow::Result<Vec<OrgRef>> {
    let segment = format!("orgs;name=*{keyword}*");
    let url = self.endpoint(&[segment.as_str()])?;
    match self.get_json(url)? {
      Some(body) => parse_orgs(&body),
      None => Ok(Vec::new()),
    }
  }

  pub fn org_nets(&self, handle: &str) -> anyhow::Result<Vec<NetRef>> {
    let url = self.endpoint(&["org", handle, "nets"])?;
    match self.get_json(url)? {
      Some(body) => parse_nets(&body),
      None => Ok(Vec::new()),
    }
  }

  /// Appends percent-encoded path segments to the base URL.
  fn endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
    let mut url =
      Url::parse(&self.base).with_context(|| format!("invalid registry URL {}", self.base))?;
    url
      .path_segments_mut()
      .map_err(|()| anyhow::anyhow!("registry URL cannot take a path: {}", self.base))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  /// `Ok(None)` when the registry answers 404, which it uses for "no
  /// results".
  fn get_json(&self, url: Url) -> anyhow::Result<Option<Vec<u8>>> {
    let label = safe_url_label(&url);
    let response = self
      .client
      .get(url)
      .header(ACCEPT, "application/json")
      .header(USER_AGENT, user_agent())
      .send()
      .with_context(|| format!("GET {label}"))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    if !status.is_success() {
      anyhow::bail!("unexpected HTTP status {} for {label}", status.as_u16());
    }
    let body = response.bytes().context("read registry response")?;
    Ok(Some(body.to_vec()))
  }
}

impl OrgRegistry for ArinClient {
  fn name(&self) -> &str {
    ARIN_SOURCE
  }

  fn search(
    &self,
    keywords: &Keywords,
    strict: bool,
    sink: &ResultSender,
  ) -> anyhow::Result<OrgSearchSummary> {
    let mut summary = OrgSearchSummary::default();
    let mut seen: HashSet<String> = HashSet::new();

    for keyword in keywords.iter() {
      let orgs = match self.find_orgs(keyword) {
        Ok(o) => o,
        Err(e) => {
          tracing::warn!(source = ARIN_SOURCE, keyword, error = %format!("{e:#}"), "organization lookup failed");
          summary.failures += 1;
          continue;
        }
      };

      for org in orgs {
        if !matcher::matches(&org.name, keywords, strict) || !seen.insert(org.handle.clone()) {
          continue;
        }
        summary.organizations += 1;

        let nets = match self.org_nets(&org.handle) {
          Ok(n) => n,
          Err(e) => {
            tracing::warn!(source = ARIN_SOURCE, org = %org.handle, error = %format!("{e:#}"), "network lookup failed");
            summary.failures += 1;
            continue;
          }
        };

        for net in nets {
          summary.networks += 1;
          let Some(block) = net_block(&net) else {
            tracing::debug!(source = ARIN_SOURCE, net = %net.handle, "skipping net with unusable range");
            continue;
          };
          for cidr in block.cidrs() {
            if !sink.submit(MatchResult::new(ARIN_SOURCE, cidr, &org.name)) {
              anyhow::bail!("result collector closed");
            }
            summary.matches += 1;
          }
        }
      }
    }

    tracing::info!(
      source = ARIN_SOURCE,
      organizations = summary.organizations,
      networks = summary.networks,
      matches = summary.matches,
      "organizational registry search finished"
    );
    Ok(summary)
  }
}

fn net_block(net: &NetRef) -> Option<Block> {
  let start: IpAddr = net.start.trim().parse().ok()?;
  let end: IpAddr = net.end.trim().parse().ok()?;
  Block::from_range(start, end)
}

/// Single results arrive as a bare object, several as an array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
  One(T),
  Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
  fn default() -> Self {
    Self::Many(Vec::new())
  }
}

impl<T> OneOrMany<T> {
  fn into_vec(self) -> Vec<T> {
    match self {
      Self::One(t) => vec![t],
      Self::Many(v) => v,
    }
  }
}

#[derive(Debug, Deserialize)]
struct OrgsEnvelope {
  orgs: OrgsBody,
}

#[derive(Debug, Deserialize)]
struct OrgsBody {
  #[serde(rename = "orgRef", default)]
  org_ref: OneOrMany<RawOrgRef>,
}

#[derive(Debug, Deserialize)]
struct RawOrgRef {
  #[serde(rename = "@handle")]
  handle: String,
  #[serde(rename = "@name", default)]
  name: String,
}

#[derive(Debug, Deserialize)]
struct NetsEnvelope {
  nets: NetsBody,
}

#[derive(Debug, Deserialize)]
struct NetsBody {
  #[serde(rename = "netRef", default)]
  net_ref: OneOrMany<RawNetRef>,
}

#[derive(Debug, Deserialize)]
struct RawNetRef {
  #[serde(rename = "@handle", default)]
  handle: String,
  #[serde(rename = "@startAddress")]
  start: String,
  #[serde(rename = "@endAddress")]
  end: String,
}

pub fn parse_orgs(body: &[u8]) -> anyhow::Result<Vec<OrgRef>> {
  let env: OrgsEnvelope = serde_json::from_slice(body).context("parse organization list")?;
  Ok(
    env
      .orgs
      .org_ref
      .into_vec()
      .into_iter()
      .map(|r| OrgRef {
        handle: r.handle,
        name: r.name,
      })
      .collect(),
  )
}

pub fn parse_nets(body: &[u8]) -> anyhow::Result<Vec<NetRef>> {
  let env: NetsEnvelope = serde_json::from_slice(body).context("parse network list")?;
  Ok(
    env
      .nets
      .net_ref
      .into_vec()
      .into_iter()
      .map(|r| NetRef {
        handle: r.handle,
        start: r.start,
        end: r.end,
      })
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_org_list_in_both_shapes() {
    let many = br#"{"orgs":{"limitExceeded":{"@limit":"256","$":"false"},"orgRef":[
      {"@handle":"EXO-1","@name":"ExampleOrg Holdings","$":"https://whois.arin.net/rest/org/EXO-1"},
      {"@handle":"EXO-2","@name":"ExampleOrgHoldings","$":"https://whois.arin.net/rest/org/EXO-2"}]}}"#;
    let one = br#"{"orgs":{"orgRef":{"@handle":"EXO-1","@name":"ExampleOrg Holdings","$":"x"}}}"#;
    let none = br#"{"orgs":{}}"#;

    let parsed = parse_orgs(many).unwrap();
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[1].handle, "EXO-2");
    assert_eq!(parse_orgs(one).unwrap()[0].name, "ExampleOrg Holdings");
    assert!(parse_orgs(none).unwrap().is_empty());
  }

  #[test]
  fn parses_net_list_and_builds_blocks() {
    let body = br#"{"nets":{"netRef":{"@startAddress":"198.51.100.0","@endAddress":"198.51.100.255","@handle":"NET-1","@name":"EXO"}}}"#;
    let nets = parse_nets(body).unwrap();
    assert_eq!(nets.len(), 1);
    let block = net_block(&nets[0]).unwrap();
    assert_eq!(block.cidrs()[0].to_string(), "198.51.100.0/24");
  }

  #[test]
  fn unusable_net_ranges_are_rejected() {
    let net = NetRef {
      handle: "NET-X".to_string(),
      start: "198.51.100.9".to_string(),
      end: "2001:db8::".to_string(),
    };
    assert!(net_block(&net).is_none());
  }

  #[test]
  fn malformed_body_is_an_error() {
    assert!(parse_orgs(b"<html>").is_err());
    assert!(parse_nets(br#"{"nets":{"netRef":[{"@handle":"N"}]}}"#).is_err());
  }

  #[test]
  fn path_segments_are_percent_encoded() {
    let client = ArinClient::new(&OrgRegistryConfig {
      base_url: "https://whois.example/rest/".to_string(),
      ..OrgRegistryConfig::default()
    })
    .unwrap();

    let orgs = client.endpoint(&["orgs;name=*acme corp*"]).unwrap();
    assert_eq!(orgs.as_str(), "https://whois.example/rest/orgs;name=*acme%20corp*");

    let nets = client.endpoint(&["org", "EXO/1", "nets"]).unwrap();
    assert_eq!(nets.as_str(), "https://whois.example/rest/org/EXO%2F1/nets");
  }
}
