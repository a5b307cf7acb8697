//! Parsing of `socker run` arguments.
//!
//! Options are matched against [`FLAG_TABLE`]. Recognized options update the
//! [`RunRequest`] and are re-emitted in canonical long form; options that
//! could sidestep the mount check or the credential drop are refused.
//! Parsing stops at the first positional argument (the image) or at `--`.

use crate::error::Result;
use crate::error::SockerErr;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub image: String,
    pub command: Vec<String>,
    /// `host[:container[:mode]]` bind specs, in the order given.
    pub volumes: Vec<String>,
    pub tty: bool,
    pub interactive: bool,
    pub detach: bool,
    pub runtime: Option<String>,
    pub network: Option<String>,
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub storage_opts: Vec<String>,
    /// Option tokens for the engine, excluding `--name` and the volumes.
    pub forwarded: Vec<String>,
}

impl RunRequest {
    /// Whether the run needs a pty relay rather than captured output.
    pub fn is_interactive(&self) -> bool {
        self.tty && !self.detach
    }
}

#[derive(Debug, Clone, Copy)]
enum FlagAction {
    /// Boolean switch, forwarded.
    Switch(fn(&mut RunRequest, bool)),
    /// Takes a value handled by the setter; the setter decides what is
    /// forwarded.
    Value(fn(&mut RunRequest, String)),
    /// Engine option we do not interpret; forwarded.
    PassthroughSwitch,
    /// Engine option with a value we do not interpret; forwarded.
    PassthroughValue,
    Denied,
}

#[derive(Debug, Clone, Copy)]
struct FlagSpec {
    long: &'static str,
    aliases: &'static [&'static str],
    short: Option<char>,
    action: FlagAction,
}

const fn flag(long: &'static str, short: Option<char>, action: FlagAction) -> FlagSpec {
    FlagSpec {
        long,
        aliases: &[],
        short,
        action,
    }
}

static FLAG_TABLE: &[FlagSpec] = &[
    flag("volume", Some('v'), FlagAction::Value(set_volume)),
    flag("tty", Some('t'), FlagAction::Switch(set_tty)),
    flag("interactive", Some('i'), FlagAction::Switch(set_interactive)),
    flag("detach", Some('d'), FlagAction::Switch(set_detach)),
    flag("runtime", None, FlagAction::Value(set_runtime)),
    FlagSpec {
        long: "network",
        aliases: &["net"],
        short: None,
        action: FlagAction::Value(set_network),
    },
    flag("name", None, FlagAction::Value(set_name)),
    flag("hostname", Some('h'), FlagAction::Value(set_hostname)),
    flag("storage-opt", None, FlagAction::Value(set_storage_opt)),
    flag("rm", None, FlagAction::PassthroughSwitch),
    flag("init", None, FlagAction::PassthroughSwitch),
    flag("read-only", None, FlagAction::PassthroughSwitch),
    flag("publish-all", Some('P'), FlagAction::PassthroughSwitch),
    flag("quiet", Some('q'), FlagAction::PassthroughSwitch),
    flag("env", Some('e'), FlagAction::PassthroughValue),
    flag("workdir", Some('w'), FlagAction::PassthroughValue),
    flag("publish", Some('p'), FlagAction::PassthroughValue),
    flag("label", Some('l'), FlagAction::PassthroughValue),
    flag("memory", Some('m'), FlagAction::PassthroughValue),
    flag("attach", Some('a'), FlagAction::PassthroughValue),
    flag("cpu-shares", Some('c'), FlagAction::PassthroughValue),
    flag("cpus", None, FlagAction::PassthroughValue),
    flag("entrypoint", None, FlagAction::PassthroughValue),
    flag("shm-size", None, FlagAction::PassthroughValue),
    flag("gpus", None, FlagAction::PassthroughValue),
    flag("add-host", None, FlagAction::PassthroughValue),
    flag("dns", None, FlagAction::PassthroughValue),
    flag("expose", None, FlagAction::PassthroughValue),
    flag("restart", None, FlagAction::PassthroughValue),
    flag("ulimit", None, FlagAction::PassthroughValue),
    flag("stop-signal", None, FlagAction::PassthroughValue),
    flag("tmpfs", None, FlagAction::PassthroughValue),
    flag("mount", None, FlagAction::Denied),
    flag("volumes-from", None, FlagAction::Denied),
    flag("privileged", None, FlagAction::Denied),
    flag("device", None, FlagAction::Denied),
    flag("cap-add", None, FlagAction::Denied),
    flag("security-opt", None, FlagAction::Denied),
    flag("pid", None, FlagAction::Denied),
    flag("ipc", None, FlagAction::Denied),
    flag("userns", None, FlagAction::Denied),
    flag("uts", None, FlagAction::Denied),
    flag("user", Some('u'), FlagAction::Denied),
    flag("group-add", None, FlagAction::Denied),
    flag("cgroup-parent", None, FlagAction::Denied),
    flag("env-file", None, FlagAction::Denied),
    flag("label-file", None, FlagAction::Denied),
    flag("cidfile", None, FlagAction::Denied),
];

fn set_volume(request: &mut RunRequest, value: String) {
    request.volumes.push(value);
}

fn set_tty(request: &mut RunRequest, on: bool) {
    request.tty = on;
}

fn set_interactive(request: &mut RunRequest, on: bool) {
    request.interactive = on;
}

fn set_detach(request: &mut RunRequest, on: bool) {
    request.detach = on;
}

fn set_runtime(request: &mut RunRequest, value: String) {
    forward(request, "runtime", &value);
    request.runtime = Some(value);
}

fn set_network(request: &mut RunRequest, value: String) {
    forward(request, "network", &value);
    request.network = Some(value);
}

fn set_name(request: &mut RunRequest, value: String) {
    request.name = Some(value);
}

fn set_hostname(request: &mut RunRequest, value: String) {
    forward(request, "hostname", &value);
    request.hostname = Some(value);
}

fn set_storage_opt(request: &mut RunRequest, value: String) {
    forward(request, "storage-opt", &value);
    request.storage_opts.push(value);
}

fn forward(request: &mut RunRequest, long: &str, value: &str) {
    request.forwarded.push(format!("--{long}"));
    request.forwarded.push(value.to_string());
}

fn lookup_long(name: &str) -> Option<&'static FlagSpec> {
    FLAG_TABLE
        .iter()
        .find(|spec| spec.long == name || spec.aliases.contains(&name))
}

fn lookup_short(c: char) -> Option<&'static FlagSpec> {
    FLAG_TABLE.iter().find(|spec| spec.short == Some(c))
}

fn parse_error(message: impl Into<String>) -> SockerErr {
    SockerErr::Parse(message.into())
}

/// Parse the arguments following `run`.
pub fn parse_run_request(argv: &[String]) -> Result<RunRequest> {
    let mut request = RunRequest::default();
    let mut idx = 0;

    while idx < argv.len() {
        let token = argv[idx].as_str();
        idx += 1;

        if token == "--" {
            break;
        }
        if let Some(body) = token.strip_prefix("--") {
            let (name, inline) = match body.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (body, None),
            };
            match lookup_long(name) {
                Some(spec) => {
                    let display = format!("--{name}");
                    apply(&mut request, spec, &display, inline, argv, &mut idx)?;
                }
                // Unknown long options travel verbatim; a value must be
                // attached with `=`.
                None => request.forwarded.push(token.to_string()),
            }
            continue;
        }
        if let Some(cluster) = token.strip_prefix('-').filter(|rest| !rest.is_empty()) {
            parse_short_cluster(&mut request, cluster, argv, &mut idx)?;
            continue;
        }

        // First positional argument: the image.
        idx -= 1;
        break;
    }

    let Some(image) = argv.get(idx) else {
        return Err(parse_error("an image name is required"));
    };
    if image.is_empty() {
        return Err(parse_error("an image name is required"));
    }
    request.image = image.clone();
    request.command = argv[idx + 1..].to_vec();
    Ok(request)
}

fn parse_short_cluster(
    request: &mut RunRequest,
    cluster: &str,
    argv: &[String],
    idx: &mut usize,
) -> Result<()> {
    for (pos, c) in cluster.char_indices() {
        let Some(spec) = lookup_short(c) else {
            return Err(parse_error(format!("unknown option -{c} in -{cluster}")));
        };
        let display = format!("-{c}");
        match spec.action {
            FlagAction::Switch(_) | FlagAction::PassthroughSwitch | FlagAction::Denied => {
                apply(request, spec, &display, None, argv, idx)?;
            }
            FlagAction::Value(_) | FlagAction::PassthroughValue => {
                // `-vPATH` attaches the value; otherwise it is the next token.
                let rest = &cluster[pos + c.len_utf8()..];
                let inline = (!rest.is_empty()).then(|| rest.to_string());
                return apply(request, spec, &display, inline, argv, idx);
            }
        }
    }
    Ok(())
}

fn apply(
    request: &mut RunRequest,
    spec: &FlagSpec,
    display: &str,
    inline: Option<String>,
    argv: &[String],
    idx: &mut usize,
) -> Result<()> {
    match spec.action {
        FlagAction::Denied => Err(parse_error(format!(
            "{display} is not permitted through socker"
        ))),
        FlagAction::Switch(set) => {
            let on = match inline.as_deref() {
                None => true,
                Some("true") => true,
                Some("false") => false,
                Some(other) => {
                    return Err(parse_error(format!(
                        "{display} takes no value, got {other:?}"
                    )));
                }
            };
            set(request, on);
            match inline {
                None => request.forwarded.push(format!("--{}", spec.long)),
                Some(_) => request.forwarded.push(format!("--{}={on}", spec.long)),
            }
            Ok(())
        }
        FlagAction::PassthroughSwitch => {
            match inline {
                Some(value) => request.forwarded.push(format!("--{}={value}", spec.long)),
                None => request.forwarded.push(format!("--{}", spec.long)),
            }
            Ok(())
        }
        FlagAction::Value(set) => {
            let value = take_value(display, inline, argv, idx)?;
            set(request, value);
            Ok(())
        }
        FlagAction::PassthroughValue => {
            let value = take_value(display, inline, argv, idx)?;
            forward(request, spec.long, &value);
            Ok(())
        }
    }
}

fn take_value(
    display: &str,
    inline: Option<String>,
    argv: &[String],
    idx: &mut usize,
) -> Result<String> {
    if let Some(value) = inline {
        return Ok(value);
    }
    let Some(value) = argv.get(*idx) else {
        return Err(parse_error(format!("{display} requires a value")));
    };
    *idx += 1;
    Ok(value.clone())
}
