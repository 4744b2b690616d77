/// Policy that shapes discovery and disk reinitialization.
#[derive(Debug, Clone, Default)]
pub struct TreeConfig {
    /// Device names that discovery skips.
    pub ignored:            Vec<String>,
    /// When non-empty, the only disks discovery considers.
    pub exclusive:          Vec<String>,
    /// Disks whose partitions may be cleared.
    pub clear_part_disks:   Vec<String>,
    /// Reinitialize unreadable disklabels without asking.
    pub zero_mbr:           bool,
    /// Initialize a fresh disklabel on every disk that may be cleared.
    pub reinitialize_disks: bool,
    /// Devices that must never be reinitialized: names, `/dev/` paths,
    /// `UUID=` or `LABEL=` specifications.
    pub protected:          Vec<String>,
}

impl TreeConfig {
    pub fn ignore<S: Into<String>>(mut self, name: S) -> Self {
        self.ignored.push(name.into());
        self
    }

    pub fn exclusive<S: Into<String>>(mut self, name: S) -> Self {
        self.exclusive.push(name.into());
        self
    }

    pub fn clear_part<S: Into<String>>(mut self, name: S) -> Self {
        self.clear_part_disks.push(name.into());
        self
    }

    pub fn protect<S: Into<String>>(mut self, spec: S) -> Self {
        self.protected.push(spec.into());
        self
    }

    pub fn zero_mbr(mut self, zero_mbr: bool) -> Self {
        self.zero_mbr = zero_mbr;
        self
    }

    pub fn reinitialize(mut self, reinitialize: bool) -> Self {
        self.reinitialize_disks = reinitialize;
        self
    }
}
