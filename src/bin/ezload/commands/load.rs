use tracing::info;

use ezload::ram::{self, LoadStage};

use crate::cli::LoadArgs;
use crate::exit_codes::EXIT_OK;

pub fn run(args: LoadArgs) -> i32 {
    match exec(args) {
        Ok(()) => EXIT_OK,
        Err(code) => code,
    }
}

fn exec(args: LoadArgs) -> Result<(), i32> {
    let chip = args.device.chip.family();
    let mut dev = super::open_device(args.device.device)?;

    let stage = match &args.loader {
        Some(loader) => {
            info!("downloading second-stage loader {}", loader.display());
            let mut loader_img = super::open_image(loader)?;
            ram::load_ram(&mut dev, &mut loader_img, chip, LoadStage::Single)
                .map_err(super::ram_exit_code)?;
            LoadStage::TwoStage
        }
        None => LoadStage::Single,
    };

    let mut img = super::open_image(&args.hex)?;
    let stats =
        ram::load_ram(&mut dev, &mut img, chip, stage).map_err(super::ram_exit_code)?;

    println!(
        "downloaded {} bytes in {} segments to the {} target",
        stats.bytes, stats.segments, chip
    );
    Ok(())
}
