//! CLI argument parsing

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub command: Command,
}

#[derive(Debug, Clone)]
pub enum Command {
    Once(OnceArgs),
    Check(CheckArgs),
}

#[derive(Debug, Clone, Default)]
pub struct OnceArgs {
    /// Config file or directory of `*.json` configs.
    pub config: String,
    pub store: Option<String>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CheckArgs {
    pub config: String,
}

/// Parse command line arguments
pub fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    let command = match args[1].as_str() {
        "once" => Command::Once(parse_once_args(&args[2..])?),
        "check" => Command::Check(parse_check_args(&args[2..])?),
        _ => return Err(format!("Unknown command: {}", args[1])),
    };

    Ok(CliArgs { command })
}

fn parse_once_args(args: &[String]) -> Result<OnceArgs, String> {
    let mut once_args = OnceArgs::default();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--store" => {
                i += 1;
                if i >= args.len() {
                    return Err("--store requires a directory".to_string());
                }
                once_args.store = Some(args[i].clone());
            }
            "--json" => {
                once_args.json = true;
            }
            "--quiet" => {
                once_args.quiet = true;
            }
            arg if !arg.starts_with("--") => {
                if once_args.config.is_empty() {
                    once_args.config = arg.to_string();
                } else {
                    return Err(format!("Unexpected argument: {arg}"));
                }
            }
            _ => return Err(format!("Unknown option: {}", args[i])),
        }
        i += 1;
    }

    if once_args.config.is_empty() {
        return Err("Missing required argument: CONFIG".to_string());
    }

    Ok(once_args)
}

fn parse_check_args(args: &[String]) -> Result<CheckArgs, String> {
    let mut config = String::new();

    for arg in args {
        if arg.starts_with("--") {
            return Err(format!("Unknown option: {arg}"));
        }
        if !config.is_empty() {
            return Err(format!("Unexpected argument: {arg}"));
        }
        config.clone_from(arg);
    }

    if config.is_empty() {
        return Err("Missing required argument: CONFIG".to_string());
    }

    Ok(CheckArgs { config })
}
