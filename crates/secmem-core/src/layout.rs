//! Fixed metadata-region map and address derivation for the protected space.
//!
//! The backing store is partitioned into contiguous regions: data lines,
//! per-line counters, per-line MACs, then one region per integrity-tree
//! level from the leaves up to the root. Only the non-root levels generate
//! traffic; the root exists solely in the advertised range end.

/// Physical byte address in the backing store.
pub type Addr = u64;

/// Size in bytes of the protected data region.
pub const DATA_SPACE_BYTES: u64 = 0x2_0000_0000;
/// Size in bytes of one protected data line.
pub const DATA_LINE_BYTES: u64 = 64;
/// Counter storage per data line (8-bit counter approximation).
pub const COUNTER_BYTES_PER_LINE: u64 = 1;
/// MAC storage per data line.
pub const MAC_ENTRY_BYTES: u64 = 16;
/// Integrity-tree node granule, and the size of the root-level region.
pub const NODE_SPACE_BYTES: u64 = 0x40;
/// Write-back granule for integrity-tree nodes.
pub const NODE_WRITE_BYTES: u64 = 8;
/// Integrity-tree depth including the root.
pub const MERKLE_LEVELS: usize = 7;
/// Tree levels that are stored and fetched as metadata; the root is implicit.
pub const STORED_MERKLE_LEVELS: usize = MERKLE_LEVELS - 1;
/// Child nodes covered by one node of the next level up.
pub const MERKLE_FANOUT: u64 = 8;

const DATA_LINE_SHIFT: u32 = DATA_LINE_BYTES.trailing_zeros();
const MAC_COMPRESS_SHIFT: u32 = (DATA_LINE_BYTES / MAC_ENTRY_BYTES).trailing_zeros();
const FANOUT_SHIFT: u32 = MERKLE_FANOUT.trailing_zeros();

/// Half-open address range advertised by a memory port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AddrRange {
    /// Inclusive start address.
    pub start: Addr,
    /// Exclusive end address.
    pub end: Addr,
    /// True when the peer interleaves this range across channels.
    pub interleaved: bool,
}

impl AddrRange {
    /// Creates a flat, non-interleaved range.
    #[must_use]
    pub const fn new(start: Addr, end: Addr) -> Self {
        Self {
            start,
            end,
            interleaved: false,
        }
    }

    /// Returns the range size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.end - self.start
    }

    /// Returns `true` when `addr` falls inside the range.
    #[must_use]
    pub const fn contains(&self, addr: Addr) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// Region classification for an arbitrary backing-store address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataRegion {
    /// Protected data line.
    Data,
    /// Per-line counter byte.
    Counter,
    /// Per-line MAC entry.
    Mac,
    /// Stored integrity-tree level (0 = leaves).
    TreeLevel(usize),
    /// Implicit root region at the top of the map.
    TreeRoot,
}

/// Computed region borders and address derivation for the metadata map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataLayout {
    cnt_border: Addr,
    mac_border: Addr,
    mt_borders: [Addr; MERKLE_LEVELS],
}

/// Canonical compile-time layout instance.
pub const LAYOUT: MetadataLayout = MetadataLayout::new();

const fn pow_fanout(exp: usize) -> u64 {
    let mut value = 1u64;
    let mut remaining = exp;
    while remaining > 0 {
        value *= MERKLE_FANOUT;
        remaining -= 1;
    }
    value
}

/// Returns the size in bytes of one stored tree level (0 = leaves).
#[must_use]
pub const fn tree_level_size(level: usize) -> u64 {
    NODE_SPACE_BYTES * pow_fanout(MERKLE_LEVELS - 1 - level)
}

impl MetadataLayout {
    /// Computes the region borders from the compile-time parameters.
    #[must_use]
    pub const fn new() -> Self {
        let cnt_border = DATA_SPACE_BYTES;
        let mac_border =
            cnt_border + (DATA_SPACE_BYTES / DATA_LINE_BYTES) * COUNTER_BYTES_PER_LINE;

        let mut mt_borders = [0; MERKLE_LEVELS];
        mt_borders[0] = mac_border + (DATA_SPACE_BYTES / DATA_LINE_BYTES) * MAC_ENTRY_BYTES;
        let mut level = 0;
        while level + 1 < MERKLE_LEVELS {
            mt_borders[level + 1] = mt_borders[level] + tree_level_size(level);
            level += 1;
        }

        Self {
            cnt_border,
            mac_border,
            mt_borders,
        }
    }

    /// First address past the data region; start of counter storage.
    #[must_use]
    pub const fn cnt_border(&self) -> Addr {
        self.cnt_border
    }

    /// Start of MAC storage.
    #[must_use]
    pub const fn mac_border(&self) -> Addr {
        self.mac_border
    }

    /// Start of the given tree level's storage (level `MERKLE_LEVELS - 1` is
    /// the root).
    #[must_use]
    pub const fn mt_border(&self, level: usize) -> Addr {
        self.mt_borders[level]
    }

    /// End of the whole metadata map; the backing store must cover exactly
    /// `[0, total_span)`.
    #[must_use]
    pub const fn total_span(&self) -> Addr {
        self.mt_borders[MERKLE_LEVELS - 1] + NODE_SPACE_BYTES
    }

    /// Counter offset of a data line; doubles as the leaf index of the tree.
    #[must_use]
    pub const fn counter_offset(data_addr: Addr) -> Addr {
        data_addr >> DATA_LINE_SHIFT
    }

    /// Address of the single counter byte guarding `data_addr`.
    #[must_use]
    pub const fn counter_addr(&self, data_addr: Addr) -> Addr {
        self.cnt_border + Self::counter_offset(data_addr)
    }

    /// 16-byte-aligned address of the MAC entry guarding `data_addr`.
    #[must_use]
    pub const fn mac_addr(&self, data_addr: Addr) -> Addr {
        (self.mac_border + (data_addr >> MAC_COMPRESS_SHIFT)) & !(MAC_ENTRY_BYTES - 1)
    }

    /// Node-aligned read address of the tree node at `level` covering the
    /// line with counter offset `cnt_offset`.
    #[must_use]
    pub const fn node_read_addr(&self, level: usize, cnt_offset: Addr) -> Addr {
        self.node_base(level, cnt_offset) & !(NODE_SPACE_BYTES - 1)
    }

    /// Write-granule-aligned address of the same tree node.
    #[must_use]
    pub const fn node_write_addr(&self, level: usize, cnt_offset: Addr) -> Addr {
        self.node_base(level, cnt_offset) & !(NODE_WRITE_BYTES - 1)
    }

    const fn node_base(&self, level: usize, cnt_offset: Addr) -> Addr {
        self.mt_borders[level] + (cnt_offset >> (FANOUT_SHIFT * (level as u32 + 1)))
    }

    /// Classifies an address into its region, or `None` when it lies past
    /// the end of the map.
    #[must_use]
    pub const fn region_of(&self, addr: Addr) -> Option<MetadataRegion> {
        if addr < self.cnt_border {
            return Some(MetadataRegion::Data);
        }
        if addr < self.mac_border {
            return Some(MetadataRegion::Counter);
        }
        if addr < self.mt_borders[0] {
            return Some(MetadataRegion::Mac);
        }
        let mut level = 0;
        while level < STORED_MERKLE_LEVELS {
            if addr < self.mt_borders[level + 1] {
                return Some(MetadataRegion::TreeLevel(level));
            }
            level += 1;
        }
        if addr < self.total_span() {
            return Some(MetadataRegion::TreeRoot);
        }
        None
    }
}

impl Default for MetadataLayout {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = assert_layout_shape();

const fn assert_layout_shape() {
    assert!(
        LAYOUT.cnt_border == DATA_SPACE_BYTES,
        "counter storage must start right after the data region"
    );
    assert!(
        LAYOUT.mac_border > LAYOUT.cnt_border && LAYOUT.mt_borders[0] > LAYOUT.mac_border,
        "metadata regions must ascend"
    );

    let mut level = 0;
    while level + 1 < MERKLE_LEVELS {
        assert!(
            LAYOUT.mt_borders[level + 1] == LAYOUT.mt_borders[level] + tree_level_size(level),
            "tree levels must be contiguous"
        );
        level += 1;
    }

    assert!(
        tree_level_size(MERKLE_LEVELS - 1) == NODE_SPACE_BYTES,
        "root level must hold exactly one node"
    );
}
