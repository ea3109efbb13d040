use regex::Regex;

lazy_static! {
    // Ordered ladder: composite paths first, so that a path crossing both a
    // service and a node boundary resolves to the enclosing cluster.
    static ref CLUSTER_LADDER: Vec<Regex> = vec![
        Regex::new(r"^(.+)/services/[^/]+/nodes").unwrap(),
        Regex::new(r"^(.+)/nodes/[^/]+/services").unwrap(),
        Regex::new(r"^(.+)/services").unwrap(),
        Regex::new(r"^(.+)/nodes").unwrap(),
    ];
    static ref NODE_DN: Regex = Regex::new(r"^(.*/nodes/[^/]+)").unwrap();
    static ref SERVICE_DN: Regex = Regex::new(r"^(.*/services/[^/]+)").unwrap();
    static ref DISK_DN: Regex = Regex::new(r"^(.*/disks/[^/]+)").unwrap();
    static ref NETWORK_DN: Regex = Regex::new(r"^(.*/networks/[^/]+)").unwrap();
    static ref NODE_SUFFIX: Regex = Regex::new(r"/nodes/[^/]+$").unwrap();
}

/// Everything after the final `/` of a path
pub fn last_segment(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    path.rsplit('/').next().unwrap_or("")
}

fn capture<'a>(re: &Regex, path: &'a str) -> Option<&'a str> {
    re.captures(path).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Longest prefix of `path` that terminates a cluster DN
///
/// Paths that never enter a `nodes/` or `services/` subtree carry no cluster
/// information and yield `None`.
pub fn cluster_dn(path: &str) -> Option<&str> {
    let path = path.trim_end_matches('/');
    CLUSTER_LADDER.iter().find_map(|re| capture(re, path))
}

/// Longest prefix of `path` naming a node
pub fn node_dn(path: &str) -> Option<&str> {
    capture(&NODE_DN, path.trim_end_matches('/'))
}

/// Longest prefix of `path` naming a service
pub fn service_dn(path: &str) -> Option<&str> {
    capture(&SERVICE_DN, path.trim_end_matches('/'))
}

/// Longest prefix of `path` naming a disk
pub fn disk_dn(path: &str) -> Option<&str> {
    capture(&DISK_DN, path.trim_end_matches('/'))
}

/// Longest prefix of `path` naming a network
pub fn network_dn(path: &str) -> Option<&str> {
    capture(&NETWORK_DN, path.trim_end_matches('/'))
}

/// Drop the trailing `/nodes/<name>` of a node DN
pub fn strip_node_suffix(dn: &str) -> String {
    NODE_SUFFIX.replace(dn.trim_end_matches('/'), "").into_owned()
}

/// Substitute separators so a DN survives as a single path segment
///
/// `/` becomes `--` and `.` becomes `__`; `dn_from_id` inverts this as long
/// as the original segments contain neither substitution sequence.
pub fn id_from_dn(dn: &str) -> String {
    dn.replace('/', "--").replace('.', "__")
}

/// Recover a DN from its single segment form
pub fn dn_from_id(id: &str) -> String {
    id.replace("__", ".").replace("--", "/")
}
