use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::info;
use turnip_shader_abi::frontends::{DescriptorSetFrontend, FlatFrontend, PipelineLayout};
use turnip_shader_abi::shader::text::parse_program;
use turnip_shader_abi::{compile, CompiledShader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Frontend {
    Flat,
    DescriptorSet,
}

/// Compiles a shader listing through one frontend and prints the emitted code and the callbacks it received
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Shader listing path
    #[clap(value_parser)]
    shader_path: PathBuf,

    #[clap(long, value_enum, default_value = "flat")]
    frontend: Frontend,

    /// Only print the callback history
    #[clap(long)]
    calls_only: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let text = std::fs::read_to_string(&args.shader_path)?;
    let program = parse_program(&text)?;
    info!(
        "{}: {} shader, {} intrinsics",
        args.shader_path.display(),
        program.info.stage,
        program.body.len()
    );

    let compiled: CompiledShader = match args.frontend {
        Frontend::Flat => compile(&program, FlatFrontend::default())?,
        Frontend::DescriptorSet => {
            let layout = PipelineLayout::from_bindings(&program.info.bindings);
            compile(&program, DescriptorSetFrontend::with_layout(layout))?
        }
    };

    if !args.calls_only {
        println!("; {} shader, {} instructions", compiled.stage, compiled.ir.len());
        print!("{}", compiled.ir);
        println!();
    }
    for (i, call) in compiled.calls.iter().enumerate() {
        println!("{:>3}: {}", i, call);
    }
    Ok(())
}
