//! Completion catalogue.
//!
//! Command completion data is built once at startup: `compgen -c` locally
//! (labelled `!command`) and on every remote host in parallel, each
//! completion tagged with the hosts offering it. Path completion fans out
//! the same way on demand. Everything here is best-effort — a host that
//! fails to answer is silently left out.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use fansh_types::RemoteSession;

use crate::connect::Connection;

/// One completion suggestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub text: String,
    pub description: String,
}

/// Builtin suggestions offered at the first token of a stage.
pub fn builtin_candidates() -> Vec<Candidate> {
    let suggest = |text: &str, description: &str| Candidate {
        text: text.to_string(),
        description: description.to_string(),
    };
    vec![
        suggest("exit", "exit fansh"),
        suggest("quit", "exit fansh"),
        suggest("clear", "clear screen"),
        suggest("%history", "show history"),
        suggest("%out", "%out [num], show history result."),
        suggest("%outlist", "%outlist, show history result list."),
        suggest(
            "%outexec",
            "%outexec [-n num] command..., exec local command with output result. result is in env variable.",
        ),
        suggest("%save", "%save [-n num] PATH, save history result to file."),
        suggest("%set", "%set NAME on|off, set shell option."),
    ]
}

/// Run a command over one connection and capture its output.
async fn run_capture(conn: &Connection, command: &str) -> Option<String> {
    let session: Arc<dyn RemoteSession> = Arc::from(conn.factory.open().await.ok()?);
    let mut stdout = session.stdout();
    let reader = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf).await;
        buf
    });

    let run = session.run(command).await;
    session.close().await;
    let bytes = reader.await.ok()?;
    run.ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Run a completion helper through the local bash.
async fn compgen_local(command: &str) -> Vec<String> {
    let output = Command::new("bash").arg("-c").arg(command).output().await;
    match output {
        Ok(output) => String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Merge per-host completion lines into candidates labelled with the
/// sorted host list offering each one.
fn merge_hosts(per_host: Vec<(String, String)>, kind: &str) -> Vec<Candidate> {
    let mut by_text: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (host, lines) in per_host {
        for line in lines.lines() {
            by_text.entry(line.to_string()).or_default().push(host.clone());
        }
    }
    by_text
        .into_iter()
        .map(|(text, mut hosts)| {
            hosts.sort();
            hosts.dedup();
            Candidate {
                description: format!("{kind}. from:{}", hosts.join(",")),
                text,
            }
        })
        .collect()
}

/// Fan a completion command out to every connection.
async fn gather_remote(conns: &[Arc<Connection>], command: &str) -> Vec<(String, String)> {
    let probes = conns.iter().map(|conn| {
        let conn = Arc::clone(conn);
        let command = command.to_string();
        async move {
            let lines = run_capture(&conn, &command).await?;
            Some((conn.name.clone(), lines))
        }
    });
    join_all(probes).await.into_iter().flatten().collect()
}

/// Unprefixed local command names, for builtins that take a local command
/// argument (`%outexec`).
pub async fn local_command_candidates() -> Vec<Candidate> {
    compgen_local("compgen -c")
        .await
        .into_iter()
        .map(|cmd| Candidate {
            text: cmd,
            description: "Command. from:localhost".to_string(),
        })
        .collect()
}

/// The startup command catalogue: local commands (as `!command`) plus
/// every remote host's command set, sorted.
pub async fn build_command_catalog(conns: &[Arc<Connection>]) -> Vec<Candidate> {
    let mut catalog: Vec<Candidate> = compgen_local("compgen -c")
        .await
        .into_iter()
        .map(|cmd| Candidate {
            text: format!("!{cmd}"),
            description: "Command. from:localhost".to_string(),
        })
        .collect();

    catalog.extend(merge_hosts(gather_remote(conns, "compgen -c").await, "Command"));
    catalog.sort_by(|a, b| a.text.cmp(&b.text));
    catalog
}

/// The completion word after its last slash, the way the editor inserts it.
fn base_name(path: &str) -> String {
    match path.rsplit('/').next() {
        Some(base) if !base.is_empty() => base.to_string(),
        _ => path.to_string(),
    }
}

/// Local filesystem path completion for `!` stages.
pub async fn local_path_candidates(word: &str) -> Vec<Candidate> {
    if cfg!(windows) {
        return Vec::new();
    }
    compgen_local(&format!("compgen -f -- {}", shell_quote(word)))
        .await
        .into_iter()
        .map(|path| Candidate {
            text: base_name(&path),
            description: "local path.".to_string(),
        })
        .collect()
}

/// Remote filesystem path completion, fanned out and merged.
pub async fn remote_path_candidates(conns: &[Arc<Connection>], word: &str) -> Vec<Candidate> {
    let command = format!("compgen -f -- {}", shell_quote(word));
    let per_host = gather_remote(conns, &command)
        .await
        .into_iter()
        .map(|(host, lines)| {
            let bases: String = lines
                .lines()
                .map(|l| format!("{}\n", base_name(l)))
                .collect();
            (host, bases)
        })
        .collect();
    merge_hosts(per_host, "remote path")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Decorator, DEFAULT_OPROMPT};
    use crate::testing::MockFactory;

    fn connection(factory: Arc<MockFactory>, index: usize) -> Arc<Connection> {
        let name = factory.server().to_string();
        Arc::new(Connection::new(
            name.clone(),
            factory,
            Decorator::new(name, DEFAULT_OPROMPT, false, index),
        ))
    }

    #[tokio::test]
    async fn remote_commands_are_labelled_with_their_hosts() {
        let h1 = Arc::new(MockFactory::with_output("h1", b"cat\nls\n".to_vec()));
        let h2 = Arc::new(MockFactory::with_output("h2", b"ls\nuname\n".to_vec()));
        let conns = vec![connection(h1, 0), connection(h2, 1)];

        let merged = merge_hosts(gather_remote(&conns, "compgen -c").await, "Command");

        let ls = merged.iter().find(|c| c.text == "ls").unwrap();
        assert_eq!(ls.description, "Command. from:h1,h2");
        let cat = merged.iter().find(|c| c.text == "cat").unwrap();
        assert_eq!(cat.description, "Command. from:h1");
    }

    #[tokio::test]
    async fn failed_hosts_are_silently_skipped() {
        let h1 = Arc::new(MockFactory::with_output("h1", b"ls\n".to_vec()));
        let h2 = Arc::new(MockFactory::with_output("h2", b"ls\n".to_vec()));
        h2.set_fail_open(true);
        let conns = vec![connection(h1, 0), connection(h2, 1)];

        let merged = merge_hosts(gather_remote(&conns, "compgen -c").await, "Command");
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].description, "Command. from:h1");
    }

    #[tokio::test]
    async fn remote_paths_are_reduced_to_base_names() {
        let h1 = Arc::new(MockFactory::with_output("h1", b"/etc/hosts\n/etc/hostname\n".to_vec()));
        let conns = vec![connection(h1, 0)];

        let candidates = remote_path_candidates(&conns, "/etc/ho").await;
        let texts: Vec<_> = candidates.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, ["hostname", "hosts"]);
    }

    #[test]
    fn base_name_keeps_plain_words() {
        assert_eq!(base_name("plain"), "plain");
        assert_eq!(base_name("dir/file"), "file");
        assert_eq!(base_name("dir/"), "dir/");
    }

    #[test]
    fn shell_quote_wraps_safely() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn builtin_candidates_cover_the_closed_set() {
        let names: Vec<_> = builtin_candidates().into_iter().map(|c| c.text).collect();
        for builtin in fansh_types::BUILTINS {
            assert!(names.contains(&builtin.to_string()), "missing {builtin}");
        }
    }
}
