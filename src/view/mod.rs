//! File views and the per-process access list.
//!
//! A [`FileView`] says which bytes of the file a process sees: starting at `disp`, the
//! filetype is tiled over the file and only its data bytes are visible. Offsets given to a
//! write are counted in etypes through that view. [`calc_my_off_len`] turns a request into
//! the process's flattened, offset-sorted [`AccessList`].

use crate::core::types::{Extent, Fragment};
use crate::datatype::Datatype;
use crate::error::{Result, TpError};

/// The filetype's runs are in increasing file order, do not overlap and end within its
/// extent, so every access list built from a view is sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileView {
    /// Byte displacement where the view starts.
    disp: u64,
    /// Size of the elementary unit offsets are counted in.
    etype_size: u64,
    /// Layout tiled over the file from `disp`.
    filetype: Datatype,
}

impl Default for FileView {
    fn default() -> Self {
        Self { disp: 0, etype_size: 1, filetype: Datatype::bytes(1) }
    }
}

impl FileView {
    pub fn new(disp: u64, etype_size: u64, filetype: Datatype) -> Result<Self> {
        if etype_size == 0 {
            return Err(TpError::InvalidArgument("etype size must be positive".into()));
        }
        if filetype.size() == 0 {
            return Err(TpError::InvalidArgument("filetype has no data bytes".into()));
        }
        if filetype.size() % etype_size != 0 {
            return Err(TpError::InvalidArgument(format!(
                "filetype size {} is not a multiple of the etype size {}",
                filetype.size(),
                etype_size
            )));
        }
        let runs = filetype.runs();
        if let Some(w) = runs.windows(2).find(|w| w[0].offset + w[0].len > w[1].offset) {
            return Err(TpError::InvalidArgument(format!(
                "filetype run at {} does not follow the run ending at {}",
                w[1].offset,
                w[0].offset + w[0].len
            )));
        }
        if let Some(r) = runs.last().filter(|r| r.offset + r.len > filetype.extent()) {
            return Err(TpError::InvalidArgument(format!(
                "filetype run ends at {}, past its extent {}",
                r.offset + r.len,
                filetype.extent()
            )));
        }
        Ok(Self { disp, etype_size, filetype })
    }

    pub fn disp(&self) -> u64 {
        self.disp
    }

    pub fn etype_size(&self) -> u64 {
        self.etype_size
    }

    pub fn filetype(&self) -> &Datatype {
        &self.filetype
    }

    /// One past the last file byte a write of `bufsize` data bytes at `offset` etypes may
    /// touch, `None` if that does not fit in a file offset.
    pub fn access_end(&self, bufsize: u64, offset: u64) -> Option<u64> {
        let data_end = offset.checked_mul(self.etype_size)?.checked_add(bufsize)?;
        let tiles = data_end.div_ceil(self.filetype.size());
        tiles.checked_mul(self.filetype.extent())?.checked_add(self.disp)
    }
}

/// One process's own request: offset-sorted fragments plus their inclusive extent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessList {
    pub fragments: Vec<Fragment>,
    pub extent: Option<Extent>,
}

impl AccessList {
    pub fn from_fragments(fragments: Vec<Fragment>) -> Self {
        let fragments: Vec<Fragment> = fragments.into_iter().filter(|f| f.len > 0).collect();
        let extent = match (fragments.first(), fragments.last()) {
            (Some(first), Some(last)) => Some(Extent::new(first.offset, last.end() - 1)),
            _ => None,
        };
        Self { fragments, extent }
    }

    pub fn total_len(&self) -> u64 {
        self.fragments.iter().map(|f| f.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Flatten a write of `bufsize` data bytes starting `offset` etypes into `view`.
pub fn calc_my_off_len(view: &FileView, bufsize: u64, offset: u64) -> AccessList {
    if bufsize == 0 {
        return AccessList::default();
    }
    let ft = &view.filetype;
    if ft.is_contiguous() {
        let start = view.disp + offset * view.etype_size;
        return AccessList::from_fragments(vec![Fragment::new(start, bufsize)]);
    }

    let tile_size = ft.size();
    let data_pos = offset * view.etype_size;
    let mut tile = data_pos / tile_size;
    let mut skip = data_pos % tile_size;
    let mut run = 0;
    while skip >= ft.runs()[run].len {
        skip -= ft.runs()[run].len;
        run += 1;
    }

    let mut fragments: Vec<Fragment> = Vec::new();
    let mut remaining = bufsize;
    while remaining > 0 {
        let r = ft.runs()[run];
        let off = view.disp + tile * ft.extent() + r.offset + skip;
        let len = (r.len - skip).min(remaining);
        match fragments.last_mut() {
            Some(last) if last.end() == off => last.len += len,
            _ => fragments.push(Fragment::new(off, len)),
        }
        remaining -= len;
        skip = 0;
        run += 1;
        if run == ft.runs().len() {
            run = 0;
            tile += 1;
        }
    }
    AccessList::from_fragments(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_view_gives_single_fragment() {
        let view = FileView::new(100, 4, Datatype::bytes(4)).unwrap();
        let al = calc_my_off_len(&view, 40, 5);
        assert_eq!(al.fragments, vec![Fragment::new(120, 40)]);
        assert_eq!(al.extent, Some(Extent::new(120, 159)));
    }

    #[test]
    fn strided_view_starts_mid_tile() {
        // 10 data bytes every 30 bytes, view shifted by 10
        let ft = Datatype::bytes(10).resized(30);
        let view = FileView::new(10, 1, ft).unwrap();
        let al = calc_my_off_len(&view, 25, 5);
        assert_eq!(
            al.fragments,
            vec![Fragment::new(15, 5), Fragment::new(40, 10), Fragment::new(70, 10)]
        );
        assert_eq!(al.extent, Some(Extent::new(15, 79)));
    }

    #[test]
    fn adjacent_tiles_coalesce() {
        // data at [0,2) and [4,8) of an 8-byte extent: the second run meets the next tile
        let ft = Datatype::hindexed(&[2, 4], &[0, 4], &Datatype::bytes(1)).unwrap();
        let view = FileView::new(0, 1, ft).unwrap();
        let al = calc_my_off_len(&view, 12, 0);
        assert_eq!(
            al.fragments,
            vec![Fragment::new(0, 2), Fragment::new(4, 6), Fragment::new(12, 4)]
        );
        assert_eq!(al.total_len(), 12);
    }

    #[test]
    fn out_of_order_filetype_is_rejected() {
        let ft = Datatype::hindexed(&[2, 3], &[10, 0], &Datatype::bytes(1)).unwrap();
        assert!(matches!(FileView::new(0, 1, ft), Err(TpError::InvalidArgument(_))));
        let ft = Datatype::hindexed(&[4, 4], &[0, 2], &Datatype::bytes(1)).unwrap();
        assert!(matches!(FileView::new(0, 1, ft), Err(TpError::InvalidArgument(_))));
    }

    #[test]
    fn filetype_reaching_past_its_extent_is_rejected() {
        let err = FileView::new(0, 1, Datatype::bytes(10).resized(5)).unwrap_err();
        assert!(err.to_string().contains("past its extent"));
        assert!(FileView::new(0, 1, Datatype::bytes(10).resized(10)).is_ok());
    }

    #[test]
    fn access_end_bounds_the_access_list() {
        let ft = Datatype::bytes(10).resized(30);
        let view = FileView::new(10, 1, ft).unwrap();
        let al = calc_my_off_len(&view, 25, 5);
        let end = view.access_end(25, 5).unwrap();
        assert!(al.fragments.iter().all(|f| f.end() <= end));
        assert_eq!(view.access_end(1, u64::MAX), None);
        assert_eq!(FileView::default().access_end(u64::MAX, 1), None);
    }

    #[test]
    fn empty_request_has_no_extent() {
        let al = calc_my_off_len(&FileView::default(), 0, 7);
        assert!(al.is_empty());
        assert_eq!(al.extent, None);
    }
}
