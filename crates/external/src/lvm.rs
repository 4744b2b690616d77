use super::{exec, exec_output};
use std::{collections::BTreeMap, io, path::{Path, PathBuf}};

/// Obtains a map of physical volume paths and their optionally-assigned volume
/// groups.
pub fn pvs() -> io::Result<BTreeMap<PathBuf, Option<String>>> {
    info!("obtaining list of physical volumes");
    exec_output("pvs", &["--noheadings".into(), "-o".into(), "pv_name,vg_name".into()])
        .map(|output| parse_pvs(&output))
}

fn parse_pvs(output: &str) -> BTreeMap<PathBuf, Option<String>> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pv = fields.next()?;
            let vg = fields.next().filter(|vg| !vg.is_empty() && *vg != "lvm2");
            Some((PathBuf::from(pv), vg.map(String::from)))
        })
        .collect()
}

/// Deactivates all logical volumes in the supplied volume group.
pub fn vgdeactivate(volume_group: &str) -> io::Result<()> {
    info!("deactivating '{}'", volume_group);
    exec("vgchange", None, None, &["-ffyan".into(), volume_group.into()])
}

/// Removes the device map at `device`, which may be a dm node or a mapper path.
pub fn dmsetup_remove<P: AsRef<Path>>(device: P) -> io::Result<()> {
    info!("removing device map {:?}", device.as_ref());
    exec("dmsetup", None, None, &["remove".into(), "--retry".into(), device.as_ref().into()])
}
