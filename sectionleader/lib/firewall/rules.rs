use std::net::Ipv4Addr;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Whether a rule is being added or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// `-A`
    Append,

    /// `-D`
    Delete,
}

/// One iptables rule, independent of whether it is being added or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    table: Option<&'static str>,
    chain: &'static str,
    spec: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Rule {
    /// The chain the rule lives in.
    pub fn chain(&self) -> &'static str {
        self.chain
    }

    /// Renders the iptables arguments for `action`.
    pub fn args(&self, action: RuleAction) -> Vec<String> {
        let mut args = Vec::with_capacity(self.spec.len() + 4);
        if let Some(table) = self.table {
            args.push("-t".to_string());
            args.push(table.to_string());
        }
        args.push(action.flag().to_string());
        args.push(self.chain.to_string());
        args.extend(self.spec.iter().cloned());
        args
    }
}

impl RuleAction {
    fn flag(&self) -> &'static str {
        match self {
            RuleAction::Append => "-A",
            RuleAction::Delete => "-D",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The four rules that expose `vm_ip:guest_port` on host port `local_port`, in install order:
/// loopback redirect, external redirect, forward accept and return-path masquerade.
pub fn forwarding_rules(vm_ip: Ipv4Addr, local_port: u16, guest_port: u16) -> [Rule; 4] {
    let destination = format!("{vm_ip}:{guest_port}");
    let spec = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let local = local_port.to_string();
    let guest = guest_port.to_string();
    let vm = vm_ip.to_string();

    [
        Rule {
            table: Some("nat"),
            chain: "OUTPUT",
            spec: spec(&[
                "-p",
                "tcp",
                "--dport",
                local.as_str(),
                "-d",
                "127.0.0.1",
                "-j",
                "DNAT",
                "--to-destination",
                destination.as_str(),
            ]),
        },
        Rule {
            table: Some("nat"),
            chain: "PREROUTING",
            spec: spec(&[
                "-p",
                "tcp",
                "--dport",
                local.as_str(),
                "-j",
                "DNAT",
                "--to-destination",
                destination.as_str(),
            ]),
        },
        Rule {
            table: None,
            chain: "FORWARD",
            spec: spec(&[
                "-p",
                "tcp",
                "-d",
                vm.as_str(),
                "--dport",
                guest.as_str(),
                "-j",
                "ACCEPT",
            ]),
        },
        Rule {
            table: Some("nat"),
            chain: "POSTROUTING",
            spec: spec(&[
                "-p",
                "tcp",
                "-s",
                vm.as_str(),
                "--sport",
                guest.as_str(),
                "-j",
                "MASQUERADE",
            ]),
        },
    ]
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
