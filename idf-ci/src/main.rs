// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use color_eyre::Result;
use idf_ci::{IdfCiApp, OutputWriter};

fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = IdfCiApp::parse();
    let output = opts.init_output();

    match opts.exec(output, &mut OutputWriter::default()) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            error.display_to_stderr(&output.stderr_styles());
            std::process::exit(error.process_exit_code())
        }
    }
}
