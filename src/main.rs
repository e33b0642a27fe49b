// kodegen-shell: line-oriented front end for the agent execution core
//
// Each line runs in one persistent shell. A trailing `&` starts the line as a
// background job instead. Built-ins: `:jobs`, `:output <id>`, `:kill <id>`,
// `:exit`.

use anyhow::{Context, Result};
use kodegen_agent_core::shell::{BackgroundJobManager, PersistentShell};
use kodegen_agent_core::types::{JobId, JobManagerOptions, ShellOptions};
use kodegen_agent_core::CoreError;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let shell = PersistentShell::new(ShellOptions::default()).context("failed to start shell")?;
    let jobs = BackgroundJobManager::new(JobManagerOptions::default())
        .context("failed to start job manager")?;
    jobs.spawn_cleanup_task(CLEANUP_INTERVAL);

    let session = CancellationToken::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt(&shell).await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').unwrap_or((line, "")) {
            (":exit" | ":quit", _) => break,
            (":jobs", _) => list_jobs(&jobs),
            (":output", id) => match jobs.get_output(&JobId::from(id.trim())) {
                Ok(output) => {
                    print!("{}", output.stdout);
                    eprint!("{}", output.stderr);
                    if output.done {
                        println!("[done, exit {}]", output.exit_code.unwrap_or(-1));
                    }
                }
                Err(e) => eprintln!("{e}"),
            },
            (":kill", id) => {
                if let Err(e) = jobs.kill(&JobId::from(id.trim())).await {
                    eprintln!("{e}");
                }
            }
            _ => {
                if let Some(command) = line.strip_suffix('&') {
                    start_job(&shell, &jobs, &session, command.trim()).await;
                } else {
                    run(&shell, line).await;
                }
            }
        }
    }

    session.cancel();
    jobs.kill_all().await;
    Ok(())
}

async fn prompt(shell: &PersistentShell) -> Result<()> {
    let cwd = shell.working_dir().await;
    print!("{}$ ", cwd.display());
    std::io::stdout().flush()?;
    Ok(())
}

async fn run(shell: &PersistentShell, command: &str) {
    // Ctrl-C interrupts the running command, not the REPL
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    match shell.execute(command, None, &cancel).await {
        Ok(output) => {
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            if !output.success() {
                eprintln!("[exit {}]", output.exit_code);
            }
        }
        Err(CoreError::Interrupted { output }) => {
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            eprintln!("[interrupted, exit {}]", output.exit_code);
        }
        Err(e) => eprintln!("{e}"),
    }
    watcher.abort();
}

async fn start_job(
    shell: &PersistentShell,
    jobs: &BackgroundJobManager,
    session: &CancellationToken,
    command: &str,
) {
    let cwd = shell.working_dir().await;
    match jobs.start(session, Some(cwd.as_path()), command, command) {
        Ok(job) => println!("[{}] {}", job.id(), job.command()),
        Err(e) => eprintln!("{e}"),
    }
}

fn list_jobs(jobs: &BackgroundJobManager) {
    for job in jobs.list() {
        let status = if job.is_done() { "done" } else { "running" };
        println!("[{}] {status:<8} {}", job.id(), job.command());
    }
}
