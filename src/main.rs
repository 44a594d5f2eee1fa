use std::path::Path;

use anyhow::{self, Context};
use clap::Parser;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;

use tpdm_backtransform::interfaces::cli::{log_heading, Cli};
use tpdm_backtransform::interfaces::input::Input;
use tpdm_backtransform::interfaces::InputHandle;
use tpdm_backtransform::io::{read_tpdm_yaml, write_tpdm_yaml};

const LOG_CONFIG: &str = "log4rs.yml";
const INPUT_TEMPLATE: &str = "tpdm_input_template";

/// Sets up logging from `log4rs.yml` in the working directory if present, or else sends the
/// `tpdm-output` log to the console and, optionally, to `output`.
fn init_logging(output: Option<&Path>) -> Result<(), anyhow::Error> {
    if Path::new(LOG_CONFIG).exists() {
        return log4rs::init_file(LOG_CONFIG, Default::default())
            .with_context(|| format!("Unable to configure logging from `{LOG_CONFIG}`"));
    }

    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{m}{n}")))
        .build();
    let mut builder =
        Config::builder().appender(Appender::builder().build("console", Box::new(console)));
    let mut output_appenders = vec!["console"];
    if let Some(path) = output {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{m}{n}")))
            .append(false)
            .build(path)
            .with_context(|| format!("Unable to open log file `{}`", path.display()))?;
        builder = builder.appender(Appender::builder().build("output", Box::new(file)));
        output_appenders.push("output");
    }
    let config = builder
        .logger(
            Logger::builder()
                .appenders(output_appenders)
                .additive(false)
                .build("tpdm-output", LevelFilter::Info),
        )
        .build(Root::builder().appender("console").build(LevelFilter::Warn))
        .with_context(|| "Unable to build the logging configuration")?;
    log4rs::init_config(config).with_context(|| "Unable to initialise logging")?;
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_logging(cli.output.as_deref())?;
    log_heading();

    let Some(config) = cli.config else {
        write_tpdm_yaml(INPUT_TEMPLATE, &Input::default())
            .with_context(|| "Unable to write the input template")?;
        log::info!(
            target: "tpdm-output",
            "No input file given. An input template has been written to `{INPUT_TEMPLATE}.yml`."
        );
        return Ok(());
    };

    let input: Input = read_tpdm_yaml(&config)
        .with_context(|| format!("Unable to read input file `{}`", config.display()))?;
    input.handle()
}
