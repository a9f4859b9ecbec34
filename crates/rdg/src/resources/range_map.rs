use rdg_device::SubresourceRange;

///Maps every subresource of a resource to a value.
///
/// Stored as a list of disjoint rectangles that always cover the whole resource. Updating a range splits the rectangles
/// it partially covers, so queries are exact on mip/layer granularity.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RangeMap<T> {
    whole: SubresourceRange,
    segments: Vec<(SubresourceRange, T)>,
}

impl<T: Clone + PartialEq> RangeMap<T> {
    pub fn new(whole: SubresourceRange, value: T) -> Self {
        RangeMap {
            whole,
            segments: vec![(whole, value)],
        }
    }

    ///Builds a map from explicit segments. Parts of `whole` not covered by `segments` get `fill`.
    pub fn from_segments(
        whole: SubresourceRange,
        fill: T,
        segments: impl IntoIterator<Item = (SubresourceRange, T)>,
    ) -> Self {
        let mut map = RangeMap::new(whole, fill);
        for (range, value) in segments {
            map.set(range, value);
        }
        map
    }

    pub fn whole(&self) -> SubresourceRange {
        self.whole
    }

    ///Calls `f` on every part of `range`, handing in the current value. The returned value replaces it.
    pub fn update(&mut self, range: SubresourceRange, mut f: impl FnMut(&T) -> T) {
        let Some(range) = range.intersection(&self.whole) else {
            return;
        };

        let mut next = Vec::with_capacity(self.segments.len() + 4);
        for (seg, value) in self.segments.drain(..) {
            match seg.intersection(&range) {
                None => next.push((seg, value)),
                Some(isec) => {
                    for rest in seg.subtract(&isec) {
                        next.push((rest, value.clone()));
                    }
                    next.push((isec, f(&value)));
                }
            }
        }
        self.segments = next;
        self.coalesce();
    }

    pub fn set(&mut self, range: SubresourceRange, value: T) {
        self.update(range, |_| value.clone());
    }

    ///Iterates the parts of `range` together with their value.
    pub fn overlapping(
        &self,
        range: SubresourceRange,
    ) -> impl Iterator<Item = (SubresourceRange, &T)> + '_ {
        self.segments
            .iter()
            .filter_map(move |(seg, value)| seg.intersection(&range).map(|isec| (isec, value)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (SubresourceRange, &T)> + '_ {
        self.segments.iter().map(|(seg, value)| (*seg, value))
    }

    ///Returns the value if the whole resource maps to one value.
    pub fn uniform(&self) -> Option<&T> {
        let first = &self.segments.first()?.1;
        if self.segments.iter().all(|(_, v)| v == first) {
            Some(first)
        } else {
            None
        }
    }

    ///Merges neighbouring segments with equal values that form a rectangle again.
    fn coalesce(&mut self) {
        let mut merged = true;
        while merged {
            merged = false;
            'search: for a in 0..self.segments.len() {
                for b in (a + 1)..self.segments.len() {
                    if self.segments[a].1 != self.segments[b].1 {
                        continue;
                    }
                    if let Some(joined) = join(&self.segments[a].0, &self.segments[b].0) {
                        self.segments[a].0 = joined;
                        self.segments.remove(b);
                        merged = true;
                        break 'search;
                    }
                }
            }
        }
        //keeps iteration order independent of the split history
        self.segments
            .sort_by_key(|(r, _)| (r.layer_base, r.mip_base, r.layer_count, r.mip_count));
    }
}

///Joins two adjacent rectangles if their union is a rectangle.
fn join(a: &SubresourceRange, b: &SubresourceRange) -> Option<SubresourceRange> {
    if a.layers() == b.layers() {
        if a.mips().end == b.mip_base {
            return Some(SubresourceRange::new(a.mip_base..b.mips().end, a.layers()));
        }
        if b.mips().end == a.mip_base {
            return Some(SubresourceRange::new(b.mip_base..a.mips().end, a.layers()));
        }
    }
    if a.mips() == b.mips() {
        if a.layers().end == b.layer_base {
            return Some(SubresourceRange::new(a.mips(), a.layer_base..b.layers().end));
        }
        if b.layers().end == a.layer_base {
            return Some(SubresourceRange::new(a.mips(), b.layer_base..a.layers().end));
        }
    }
    None
}
