use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::Result;
use crate::error::SockerErr;
use crate::exec::CommandRunner;
use crate::exec::CommandSpec;

/// `pgrep` reports "no processes matched" with exit status 1.
const PGREP_NO_MATCH: i32 = 1;

/// Walks a process tree with `pgrep -P`.
#[derive(Clone)]
pub struct ProcessTree {
    runner: Arc<dyn CommandRunner>,
    pgrep: String,
}

impl ProcessTree {
    pub fn new(runner: Arc<dyn CommandRunner>, pgrep: impl Into<String>) -> Self {
        Self {
            runner,
            pgrep: pgrep.into(),
        }
    }

    /// Direct children of `pid`.
    pub async fn children(&self, pid: u32) -> Result<Vec<u32>> {
        let spec = CommandSpec::new(&self.pgrep, vec!["-P".to_string(), pid.to_string()]);
        let output = self.runner.output(&spec).await?;
        match output.status {
            Some(0) => parse_pids(&self.pgrep, &output.stdout),
            Some(PGREP_NO_MATCH) => Ok(Vec::new()),
            _ => Err(SockerErr::Subprocess {
                program: self.pgrep.clone(),
                status: output.status,
                stderr: output.stderr,
            }),
        }
    }

    /// Every descendant of `root`, breadth first, excluding `root` itself.
    pub async fn descendants(&self, root: u32) -> Result<Vec<u32>> {
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        let mut found = Vec::new();
        while let Some(pid) = queue.pop_front() {
            for child in self.children(pid).await? {
                if seen.insert(child) {
                    found.push(child);
                    queue.push_back(child);
                }
            }
        }
        Ok(found)
    }
}

/// One pid per line; blank lines are ignored.
pub fn parse_pids(program: &str, stdout: &str) -> Result<Vec<u32>> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<u32>().map_err(|_| SockerErr::MalformedOutput {
                program: program.to_string(),
                output: line.to_string(),
            })
        })
        .collect()
}
