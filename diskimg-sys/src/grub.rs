// SPDX-License-Identifier: GPL-3.0-only

//! Legacy grub staging and installation
//!
//! The boot partition carries the program under a fixed name and a menu that
//! boots it straight away:
//!
//! ```text
//! boot/program.bin
//! boot/grub/menu.lst
//! boot/grub/grub.conf
//! boot/grub/device.map
//! ```

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::cmd::Shell;
use crate::config::Tool;
use crate::error::Result;
use crate::resource::BlockDevice;

/// File name of the staged kernel under `boot/`
pub const PROGRAM_NAME: &str = "program.bin";

const MENU_TITLE: &str = "Unikernel";

/// Menu shared by `menu.lst` and `grub.conf`
pub fn render_menu(root_drive: &str, cmdline: &str) -> String {
    format!(
        "default=0\n\
         fallback=1\n\
         timeout=1\n\
         hiddenmenu\n\
         \n\
         title {MENU_TITLE}\n\
         root {root_drive}\n\
         kernel /boot/{PROGRAM_NAME} {cmdline}\n"
    )
}

/// Binds grub's first disk to the device grub is installed through
pub fn render_device_map(root_device: &BlockDevice) -> String {
    format!("(hd0) {}\n", root_device.path().display())
}

/// Stage the program and the grub configuration below `folder`
pub fn prepare_grub(
    folder: &Path,
    root_device: &BlockDevice,
    program: &Path,
    cmdline: &str,
    root_drive: &str,
) -> Result<()> {
    let boot = folder.join("boot");
    let grub = boot.join("grub");
    fs::create_dir_all(&grub)?;

    let program_dst = boot.join(PROGRAM_NAME);
    debug!(src = %program.display(), dst = %program_dst.display(), "copying program");
    fs::copy(program, &program_dst)?;

    let menu = render_menu(root_drive, cmdline);
    fs::write(grub.join("menu.lst"), &menu)?;
    fs::write(grub.join("grub.conf"), &menu)?;
    fs::write(grub.join("device.map"), render_device_map(root_device))?;
    Ok(())
}

/// Install grub to `root_device`, with `root_directory` as the mounted boot
/// partition
pub fn install_grub(
    shell: Shell<'_>,
    root_directory: &Path,
    root_device: &BlockDevice,
) -> Result<()> {
    let root_arg = format!("--root-directory={}", root_directory.display());
    shell.run(
        Tool::GrubInstall,
        &["--no-floppy", &root_arg, &root_device.path_str()],
    )?;
    Ok(())
}
