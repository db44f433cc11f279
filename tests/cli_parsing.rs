use clap::Parser;
use flotilla::cli::{Cli, Commands};
use flotilla::domain::models::TaskStatus;

#[test]
fn test_parse_run_defaults() {
    let cli = Cli::try_parse_from(["flotilla", "run"]).unwrap();
    assert!(!cli.json);
    match cli.command {
        Commands::Run(args) => {
            assert!(args.design.is_empty());
            assert!(!args.fresh);
            assert_eq!(args.workers, None);
            assert_eq!(args.verbose, 0);
        }
        Commands::Status(_) => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_run_with_flags() {
    let cli = Cli::try_parse_from([
        "flotilla",
        "run",
        "specs/",
        "--fresh",
        "-n",
        "3",
        "--timeout",
        "600",
        "--max-turns",
        "40",
        "--skip-validation",
        "-x",
        "-vv",
        "--json",
    ])
    .unwrap();

    assert!(cli.json, "--json is global");
    let Commands::Run(args) = cli.command else {
        panic!("Wrong top-level command");
    };
    assert_eq!(args.design, vec!["specs/".to_string()]);
    assert!(args.fresh);
    assert_eq!(args.workers, Some(3));
    assert_eq!(args.timeout, Some(600));
    assert_eq!(args.max_turns, Some(40));
    assert!(args.skip_validation);
    assert!(args.refiner);
    assert!(!args.check);
    assert_eq!(args.verbose, 2);
}

#[test]
fn test_parse_inline_goal() {
    let cli = Cli::try_parse_from(["flotilla", "run", "build", "a", "todo", "cli", "--check"])
        .unwrap();
    let Commands::Run(args) = cli.command else {
        panic!("Wrong top-level command");
    };
    assert_eq!(args.design.join(" "), "build a todo cli");
    assert!(args.check);
}

#[test]
fn test_parse_status_filter() {
    let cli = Cli::try_parse_from(["flotilla", "-j", "status", "--status", "cascade-failed"])
        .unwrap();
    assert!(cli.json);
    let Commands::Status(args) = cli.command else {
        panic!("Wrong top-level command");
    };
    assert_eq!(args.status, Some(TaskStatus::CascadeFailed));
}

#[test]
fn test_parse_rejects_unknown_status() {
    assert!(Cli::try_parse_from(["flotilla", "status", "--status", "stuck"]).is_err());
}

#[test]
fn test_parse_requires_subcommand() {
    assert!(Cli::try_parse_from(["flotilla"]).is_err());
}
