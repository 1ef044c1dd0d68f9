// aml CLI: evaluate a document and print it as JSON, YAML or AML

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "aml")]
#[command(about = "Evaluate AML configuration files", long_about = None)]
struct Args {
    /// Input file (also accepted as the positional argument)
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,

    /// Input file; stdin when neither this nor -f is given
    input: Option<PathBuf>,

    /// Output format
    #[arg(long = "output", value_enum, default_value_t = Output::Json)]
    output: Output,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Output {
    Json,
    Yaml,
    Aml,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let (source, filename) = match read_input(&args) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("aml: {e}");
            return ExitCode::from(2);
        }
    };

    match run(&source, &filename, args.output) {
        Ok(out) => {
            print!("{out}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("aml: {e}");
            ExitCode::from(1)
        }
    }
}

fn read_input(args: &Args) -> Result<(String, String), std::io::Error> {
    let path = args.file.as_ref().or(args.input.as_ref());
    match path {
        Some(path) => {
            let mut source = String::new();
            File::open(path)?.read_to_string(&mut source)?;
            Ok((source, path.display().to_string()))
        }
        None => {
            let mut source = String::new();
            std::io::stdin().read_to_string(&mut source)?;
            Ok((source, "<stdin>".to_string()))
        }
    }
}

fn run(source: &str, filename: &str, output: Output) -> Result<String, aml::Error> {
    match output {
        Output::Aml => {
            let node = aml::parser::parse(filename, source)?;
            Ok(aml::printer::print(&node))
        }
        Output::Json => {
            let data = aml::Decoder::new(source.as_bytes())
                .with_filename(filename)
                .decode_value()?;
            let mut text = serde_json::to_string_pretty(&data)?;
            text.push('\n');
            Ok(text)
        }
        Output::Yaml => {
            let data = aml::Decoder::new(source.as_bytes())
                .with_filename(filename)
                .decode_value()?;
            serde_yaml::to_string(&data).map_err(|e| {
                aml::Error::Eval(aml::EvalError::Evaluation(format!("yaml encode: {e}")))
            })
        }
    }
}
