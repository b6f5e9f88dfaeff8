//! Netfilter rule builder producing `iptables` argument vectors.

/// Table types in netfilter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Filter,
    Nat,
}

impl Table {
    fn as_str(&self) -> &str {
        match self {
            Table::Filter => "filter",
            Table::Nat => "nat",
        }
    }
}

/// Chain names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Forward,
    Postrouting,
}

impl Chain {
    fn as_str(&self) -> &str {
        match self {
            Chain::Forward => "FORWARD",
            Chain::Postrouting => "POSTROUTING",
        }
    }
}

/// Target actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Accept,
    Masquerade,
}

impl Target {
    fn as_str(&self) -> &str {
        match self {
            Target::Accept => "ACCEPT",
            Target::Masquerade => "MASQUERADE",
        }
    }
}

/// Iptables rule builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    table: Table,
    chain: Chain,
    in_interface: Option<String>,
    out_interface: Option<String>,
    state: Option<String>,
    target: Target,
}

impl Rule {
    pub fn new(table: Table, chain: Chain, target: Target) -> Self {
        Self {
            table,
            chain,
            in_interface: None,
            out_interface: None,
            state: None,
            target,
        }
    }

    pub fn in_interface(mut self, iface: &str) -> Self {
        self.in_interface = Some(iface.to_string());
        self
    }

    pub fn out_interface(mut self, iface: &str) -> Self {
        self.out_interface = Some(iface.to_string());
        self
    }

    pub fn connection_state(mut self, state: &str) -> Self {
        self.state = Some(state.to_string());
        self
    }

    fn to_args(&self, action: &str) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            self.table.as_str().to_string(),
            action.to_string(),
            self.chain.as_str().to_string(),
        ];

        if let Some(iface) = &self.in_interface {
            args.push("-i".to_string());
            args.push(iface.clone());
        }

        if let Some(iface) = &self.out_interface {
            args.push("-o".to_string());
            args.push(iface.clone());
        }

        if let Some(state) = &self.state {
            args.push("-m".to_string());
            args.push("state".to_string());
            args.push("--state".to_string());
            args.push(state.clone());
        }

        args.push("-j".to_string());
        args.push(self.target.as_str().to_string());
        args
    }

    pub fn append_args(&self) -> Vec<String> {
        self.to_args("-A")
    }

    pub fn delete_args(&self) -> Vec<String> {
        self.to_args("-D")
    }
}

/// Rules that let clients on `ap` reach the network behind `upstream`.
pub fn hotspot_nat_rules(ap: &str, upstream: &str) -> Vec<Rule> {
    vec![
        Rule::new(Table::Nat, Chain::Postrouting, Target::Masquerade).out_interface(upstream),
        Rule::new(Table::Filter, Chain::Forward, Target::Accept)
            .in_interface(upstream)
            .out_interface(ap)
            .connection_state("RELATED,ESTABLISHED"),
        Rule::new(Table::Filter, Chain::Forward, Target::Accept)
            .in_interface(ap)
            .out_interface(upstream),
    ]
}
