// Aggregation policies: what to group by, how to name the metric, how many rows to keep.

use std::fmt;

use serde::Deserialize;

use super::GroupKey;

/// Grouping key of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    /// Destination transport port, labeled from the port-name table.
    Port,
    /// IP version of the flow (`ipVersion` in the record's JSON attributes).
    IpVersion,
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Port => f.write_str("port"),
            Self::IpVersion => f.write_str("ip_version"),
        }
    }
}

/// What to do with a port that has no entry in the port-name table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingLabel {
    /// Drop the port from the result (inner join). Unlabeled ports do not use up `limit`.
    #[default]
    Exclude,
    /// Keep the port and label it with the policy's `sentinel`.
    Sentinel,
}

/// One aggregate to compute per run. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AggregationPolicy {
    pub name: String,
    pub group_by: GroupBy,
    pub metric: MetricTemplate,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub missing_label: MissingLabel,
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
}

pub const DEFAULT_LIMIT: u32 = 10;
pub const DEFAULT_SENTINEL: &str = "unknown";

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

fn default_sentinel() -> String {
    DEFAULT_SENTINEL.to_string()
}

impl AggregationPolicy {
    /// Top-`limit` destination ports as `net.<name>-<port>`, unknown ports excluded.
    pub fn top_ports(limit: u32) -> Self {
        Self {
            name: "ports".into(),
            group_by: GroupBy::Port,
            metric: MetricTemplate::from_segments(
                "net.{name}-{port}",
                vec![
                    Segment::Literal("net.".into()),
                    Segment::Field(Placeholder::Name),
                    Segment::Literal("-".into()),
                    Segment::Field(Placeholder::Port),
                ],
            ),
            limit,
            missing_label: MissingLabel::Exclude,
            sentinel: default_sentinel(),
        }
    }

    /// Top-`limit` IP versions as `net.ipv<version>`.
    pub fn top_ip_versions(limit: u32) -> Self {
        Self {
            name: "ip_versions".into(),
            group_by: GroupBy::IpVersion,
            metric: MetricTemplate::from_segments(
                "net.ipv{version}",
                vec![
                    Segment::Literal("net.ipv".into()),
                    Segment::Field(Placeholder::Version),
                ],
            ),
            limit,
            missing_label: MissingLabel::Exclude,
            sentinel: default_sentinel(),
        }
    }

    /// Same policy, labeling unknown ports with `sentinel` instead of dropping them.
    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.missing_label = MissingLabel::Sentinel;
        self.sentinel = sentinel.into();
        self
    }

    /// Sentinel label for unknown ports, or None when they are excluded.
    pub fn sentinel_label(&self) -> Option<&str> {
        match self.missing_label {
            MissingLabel::Exclude => None,
            MissingLabel::Sentinel => Some(&self.sentinel),
        }
    }
}

/// Policies used when the config file declares none.
pub fn default_policies() -> Vec<AggregationPolicy> {
    vec![
        AggregationPolicy::top_ports(DEFAULT_LIMIT),
        AggregationPolicy::top_ip_versions(DEFAULT_LIMIT),
    ]
}

/// Placeholder usable inside a metric name template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Name,
    Port,
    Version,
}

impl Placeholder {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "name" => Some(Self::Name),
            "port" => Some(Self::Port),
            "version" => Some(Self::Version),
            _ => None,
        }
    }

    /// Whether the placeholder has a value for rows of this grouping.
    pub fn applies_to(self, group_by: GroupBy) -> bool {
        matches!(
            (self, group_by),
            (Self::Name | Self::Port, GroupBy::Port) | (Self::Version, GroupBy::IpVersion)
        )
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => f.write_str("{name}"),
            Self::Port => f.write_str("{port}"),
            Self::Version => f.write_str("{version}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Placeholder),
}

/// Parsed metric name template such as `net.{name}-{port}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct MetricTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl MetricTemplate {
    fn from_segments(source: &str, segments: Vec<Segment>) -> Self {
        Self {
            source: source.to_string(),
            segments,
        }
    }

    pub fn parse(source: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;
        while let Some(c) = rest.chars().next() {
            match c {
                '{' => {
                    let Some(end) = rest.find('}') else {
                        return Err(format!("unterminated placeholder in {source:?}"));
                    };
                    let field = &rest[1..end];
                    let Some(p) = Placeholder::parse(field) else {
                        return Err(format!("unknown placeholder {{{field}}} in {source:?}"));
                    };
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(p));
                    rest = &rest[end + 1..];
                }
                '}' => return Err(format!("unmatched '}}' in {source:?}")),
                _ => {
                    literal.push(c);
                    rest = &rest[c.len_utf8()..];
                }
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        if segments.is_empty() {
            return Err("metric template is empty".into());
        }
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn placeholders(&self) -> impl Iterator<Item = Placeholder> + '_ {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(p) => Some(*p),
            Segment::Literal(_) => None,
        })
    }

    /// Fills the template from a row's group key. Placeholders that do not apply
    /// to the key render as empty; config validation rejects such templates.
    pub fn render(&self, key: &GroupKey) -> String {
        let mut out = String::with_capacity(self.source.len() + 16);
        for seg in &self.segments {
            match (seg, key) {
                (Segment::Literal(s), _) => out.push_str(s),
                (Segment::Field(Placeholder::Name), GroupKey::Port { name, .. }) => {
                    out.push_str(name)
                }
                (Segment::Field(Placeholder::Port), GroupKey::Port { port, .. }) => {
                    out.push_str(&port.to_string())
                }
                (Segment::Field(Placeholder::Version), GroupKey::IpVersion(Some(v))) => {
                    out.push_str(&v.to_string())
                }
                (Segment::Field(_), _) => {}
            }
        }
        out
    }
}

impl TryFrom<String> for MetricTemplate {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl fmt::Display for MetricTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
