use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "hearth-server", about = "Hearth chat server")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/hearth.toml")]
    pub config: String,

    /// Bind address override (e.g. 0.0.0.0:4000)
    #[arg(long)]
    pub bind: Option<String>,
}
