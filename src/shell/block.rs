//! Command deny rules
//!
//! A [`BlockFunc`] sees one simple command as `[name, args...]` and returns
//! `true` to reject the whole command line.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use super::parser::ParsedCommand;

/// Predicate over one simple command's argv
pub type BlockFunc = Arc<dyn Fn(&[String]) -> bool + Send + Sync>;

/// Block any simple command whose name (or its basename) is in `names`
pub fn command_blocker<I, S>(names: I) -> BlockFunc
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let names: HashSet<String> = names.into_iter().map(Into::into).collect();
    Arc::new(move |argv: &[String]| {
        argv.first().is_some_and(|name| {
            names.contains(name)
                || Path::new(name)
                    .file_name()
                    .and_then(|base| base.to_str())
                    .is_some_and(|base| names.contains(base))
        })
    })
}

/// Block `command` when its leading arguments equal `args` and every flag in
/// `flags` appears somewhere after them
///
/// `argument_blocker("npm", ["install"], ["--global"])` rejects
/// `npm install --global left-pad` but allows `npm install left-pad`.
pub fn argument_blocker<S>(command: impl Into<String>, args: &[S], flags: &[S]) -> BlockFunc
where
    S: AsRef<str>,
{
    let command = command.into();
    let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
    let flags: Vec<String> = flags.iter().map(|f| f.as_ref().to_string()).collect();

    Arc::new(move |argv: &[String]| {
        let Some((name, rest)) = argv.split_first() else {
            return false;
        };
        if *name != command || rest.len() < args.len() {
            return false;
        }
        if rest.iter().zip(&args).any(|(have, want)| have != want) {
            return false;
        }
        let tail = &rest[args.len()..];
        flags.iter().all(|flag| tail.iter().any(|arg| arg == flag))
    })
}

/// First simple command rejected by any rule, rendered for the error message
pub(crate) fn find_blocked(funcs: &[BlockFunc], parsed: &ParsedCommand) -> Option<String> {
    if funcs.is_empty() {
        return None;
    }
    parsed
        .simple_commands
        .iter()
        .find(|argv| funcs.iter().any(|block| block(argv)))
        .map(|argv| argv.join(" "))
}
