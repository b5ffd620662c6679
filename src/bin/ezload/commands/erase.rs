use tracing::info;

use ezload::eeprom::{self, EepromAddressing};
use ezload::ram::{self, LoadStage};

use crate::cli::EraseArgs;
use crate::exit_codes::EXIT_OK;

pub fn run(args: EraseArgs) -> i32 {
    match exec(args) {
        Ok(()) => EXIT_OK,
        Err(code) => code,
    }
}

fn exec(args: EraseArgs) -> Result<(), i32> {
    let chip = args.device.chip.family();
    let mut dev = super::open_device(args.device.device)?;

    info!("downloading second-stage loader {}", args.loader.display());
    let mut loader_img = super::open_image(&args.loader)?;
    ram::load_ram(&mut dev, &mut loader_img, chip, LoadStage::Single)
        .map_err(super::ram_exit_code)?;

    let addressing = if args.large_eeprom {
        EepromAddressing::Large
    } else {
        EepromAddressing::Standard
    };
    eeprom::erase_eeprom(&mut dev, addressing).map_err(super::eeprom_exit_code)?;

    println!("EEPROM erased (filled with 0xff); it no longer boots");
    Ok(())
}
