//! Account lookups for the invoking user and the engine account.

use std::ffi::CString;
use std::path::PathBuf;

use nix::unistd::Gid;
use nix::unistd::Group;
use nix::unistd::Uid;
use nix::unistd::User;
use socker_utils_pty::ChildCredential;

use crate::error::PrerequisiteKind;
use crate::error::Result;
use crate::error::SockerErr;

/// Numeric identity a child process is switched to before exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<u32>,
    pub account: String,
}

impl Credential {
    pub fn to_child(&self) -> ChildCredential {
        ChildCredential {
            uid: self.uid,
            gid: self.gid,
            groups: self.groups.clone(),
        }
    }
}

/// Who ran socker. Always the real uid/gid, never the effective ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub uid: u32,
    pub gid: u32,
    pub username: String,
    pub group_name: String,
    pub home: PathBuf,
}

impl CallerIdentity {
    /// `uid:gid` as handed to the engine's `--user` flag.
    pub fn user_spec(&self) -> String {
        format!("{}:{}", self.uid, self.gid)
    }
}

/// Look up `account` and check that it belongs to `group`.
///
/// Membership holds when `group` is the account's primary group or lists the
/// account among its members.
pub fn resolve_account(account: &str, group: &str) -> Result<Credential> {
    let user = User::from_name(account)
        .map_err(|err| {
            SockerErr::prerequisite(
                PrerequisiteKind::MissingAccount,
                format!("failed to look up account {account}: {err}"),
            )
        })?
        .ok_or_else(|| {
            SockerErr::prerequisite(
                PrerequisiteKind::MissingAccount,
                format!("the account {account} does not exist"),
            )
        })?;
    let engine_group = Group::from_name(group)
        .map_err(|err| {
            SockerErr::prerequisite(
                PrerequisiteKind::MissingGroup,
                format!("failed to look up group {group}: {err}"),
            )
        })?
        .ok_or_else(|| {
            SockerErr::prerequisite(
                PrerequisiteKind::MissingGroup,
                format!("the group {group} does not exist"),
            )
        })?;

    if !is_member(&user.name, user.gid, engine_group.gid, &engine_group.mem) {
        return Err(SockerErr::prerequisite(
            PrerequisiteKind::NotGroupMember,
            format!("the account {account} is not a member of the group {group}"),
        ));
    }

    let groups = supplementary_groups(&user)?;
    tracing::debug!(
        account,
        uid = user.uid.as_raw(),
        gid = user.gid.as_raw(),
        "resolved engine account"
    );
    Ok(Credential {
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
        groups,
        account: user.name,
    })
}

fn is_member(account: &str, primary_gid: Gid, group_gid: Gid, members: &[String]) -> bool {
    primary_gid == group_gid || members.iter().any(|member| member == account)
}

/// Every group of `user`, primary group included.
fn supplementary_groups(user: &User) -> Result<Vec<u32>> {
    let name = CString::new(user.name.as_str()).map_err(|_| {
        SockerErr::prerequisite(
            PrerequisiteKind::MissingAccount,
            format!("account name {:?} contains a NUL byte", user.name),
        )
    })?;
    let groups = nix::unistd::getgrouplist(&name, user.gid).map_err(|err| {
        SockerErr::prerequisite(
            PrerequisiteKind::MissingAccount,
            format!("failed to list groups of {}: {err}", user.name),
        )
    })?;
    Ok(groups.into_iter().map(Gid::as_raw).collect())
}

/// Identify the invoking user from the real uid and gid.
pub fn resolve_caller() -> Result<CallerIdentity> {
    let uid = nix::unistd::getuid();
    let gid = nix::unistd::getgid();
    caller_from_ids(uid, gid)
}

pub(crate) fn caller_from_ids(uid: Uid, gid: Gid) -> Result<CallerIdentity> {
    let user = User::from_uid(uid)
        .map_err(|err| caller_lookup(format!("failed to look up uid {uid}: {err}")))?
        .ok_or_else(|| caller_lookup(format!("uid {uid} has no passwd entry")))?;
    let group = Group::from_gid(gid)
        .map_err(|err| caller_lookup(format!("failed to look up gid {gid}: {err}")))?
        .ok_or_else(|| caller_lookup(format!("gid {gid} has no group entry")))?;
    Ok(CallerIdentity {
        uid: uid.as_raw(),
        gid: gid.as_raw(),
        username: user.name,
        group_name: group.name,
        home: user.dir,
    })
}

fn caller_lookup(message: String) -> SockerErr {
    SockerErr::prerequisite(PrerequisiteKind::CallerLookup, message)
}
