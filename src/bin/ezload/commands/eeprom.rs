use tracing::info;

use ezload::chips::ChipFamily;
use ezload::eeprom::{self, EepromAddressing, EepromOptions};
use ezload::ram::{self, LoadStage};

use crate::cli::EepromArgs;
use crate::exit_codes::EXIT_OK;

pub fn run(args: EepromArgs) -> i32 {
    match exec(args) {
        Ok(()) => EXIT_OK,
        Err(code) => code,
    }
}

fn exec(args: EepromArgs) -> Result<(), i32> {
    let chip = args.device.chip.family();
    let mut dev = super::open_device(args.device.device)?;

    info!("downloading second-stage loader {}", args.loader.display());
    let mut loader_img = super::open_image(&args.loader)?;
    ram::load_ram(&mut dev, &mut loader_img, chip, LoadStage::Single)
        .map_err(super::ram_exit_code)?;

    let opts = EepromOptions {
        config: args.config.unwrap_or(match chip {
            ChipFamily::Fx2 | ChipFamily::Fx2lp => 0x08,
            ChipFamily::Fx | ChipFamily::An21 => 0x00,
        }),
        addressing: if args.large_eeprom {
            EepromAddressing::Large
        } else {
            EepromAddressing::Standard
        },
        vid: args.vid_pid.map(|id| id.vid),
        pid: args.vid_pid.map(|id| id.pid),
    };

    let mut image = match &args.hex {
        Some(path) => Some(super::open_image(path)?),
        None => None,
    };
    eeprom::load_eeprom(&mut dev, image.as_mut(), chip, &opts)
        .map_err(super::eeprom_exit_code)?;

    println!("EEPROM written; re-plug the device to boot from it");
    Ok(())
}
