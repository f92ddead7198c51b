use ahash::AHashMap;

use crate::error::{NdcgMfError, Result};

// ── CSR rating lists ────────────────────────────────────────────────

/// Compressed sparse rows: row `r` owns `partners[indptr[r]..indptr[r + 1]]`,
/// sorted ascending, with the matching `ratings`.
#[derive(Debug, Clone)]
pub(crate) struct RatingLists {
    indptr: Vec<usize>,
    partners: Vec<u32>,
    ratings: Vec<f64>,
}

impl RatingLists {
    #[inline]
    fn span(&self, row: usize) -> std::ops::Range<usize> {
        self.indptr[row]..self.indptr[row + 1]
    }

    fn n_rows(&self) -> usize {
        self.indptr.len() - 1
    }
}

/// Build user-major CSR from COO triples (user index, item index, rating).
/// Rows come out sorted by item; a repeated pair is reported as its row/col.
fn build_csr(triples: &[(u32, u32, f64)], n_rows: usize) -> std::result::Result<RatingLists, (u32, u32)> {
    let mut counts = vec![0usize; n_rows];
    for &(u, _, _) in triples {
        counts[u as usize] += 1;
    }
    let mut indptr = vec![0usize; n_rows + 1];
    for r in 0..n_rows {
        indptr[r + 1] = indptr[r] + counts[r];
    }
    let nnz = triples.len();
    let mut partners = vec![0u32; nnz];
    let mut ratings = vec![0.0f64; nnz];
    let mut pos = indptr[..n_rows].to_vec();
    for &(u, i, r) in triples {
        let p = pos[u as usize];
        partners[p] = i;
        ratings[p] = r;
        pos[u as usize] += 1;
    }

    for u in 0..n_rows {
        let (start, end) = (indptr[u], indptr[u + 1]);
        if end - start <= 1 {
            continue;
        }
        let mut row: Vec<(u32, f64)> = partners[start..end]
            .iter()
            .copied()
            .zip(ratings[start..end].iter().copied())
            .collect();
        row.sort_unstable_by_key(|&(i, _)| i);
        if let Some(w) = row.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err((u as u32, w[0].0));
        }
        for (off, (i, r)) in row.into_iter().enumerate() {
            partners[start + off] = i;
            ratings[start + off] = r;
        }
    }

    Ok(RatingLists {
        indptr,
        partners,
        ratings,
    })
}

/// Transpose a CSR. Rows are visited in ascending order, so the transposed
/// rows come out sorted as well.
fn csr_transpose(lists: &RatingLists, n_cols: usize) -> RatingLists {
    let nnz = lists.partners.len();
    let mut counts = vec![0usize; n_cols];
    for &c in &lists.partners {
        counts[c as usize] += 1;
    }
    let mut indptr = vec![0usize; n_cols + 1];
    for c in 0..n_cols {
        indptr[c + 1] = indptr[c] + counts[c];
    }
    let mut partners = vec![0u32; nnz];
    let mut ratings = vec![0.0f64; nnz];
    let mut pos = indptr[..n_cols].to_vec();
    for row in 0..lists.n_rows() {
        for idx in lists.span(row) {
            let col = lists.partners[idx] as usize;
            let p = pos[col];
            partners[p] = row as u32;
            ratings[p] = lists.ratings[idx];
            pos[col] += 1;
        }
    }
    RatingLists {
        indptr,
        partners,
        ratings,
    }
}

/// Span of `row` in a caller-supplied `indptr`; `None` if the row is missing,
/// negative, decreasing or runs past `nnz`.
#[cfg_attr(not(feature = "python"), allow(dead_code))]
pub(crate) fn csr_row_span(indptr: &[i64], row: usize, nnz: usize) -> Option<std::ops::Range<usize>> {
    let (&start, &end) = (indptr.get(row)?, indptr.get(row + 1)?);
    if start < 0 || start > end || end as usize > nnz {
        return None;
    }
    Some(start as usize..end as usize)
}

// ── Registry ────────────────────────────────────────────────────────

/// Ratings of one user (partners are item indices) or one item (partners are
/// user indices), sorted by partner index.
#[derive(Debug, Clone, Copy)]
pub struct EntityRatings<'a> {
    pub index: usize,
    pub code: u64,
    pub partners: &'a [u32],
    pub ratings: &'a [f64],
}

impl<'a> EntityRatings<'a> {
    #[inline]
    pub fn num_ratings(&self) -> usize {
        self.partners.len()
    }

    /// Position of `partner` in this entity's sorted list.
    #[inline]
    pub fn position_of(&self, partner: usize) -> Option<usize> {
        self.partners.binary_search(&(partner as u32)).ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + 'a {
        let (partners, ratings) = (self.partners, self.ratings);
        partners.iter().zip(ratings).map(|(&p, &r)| (p as usize, r))
    }
}

/// Users, items and their ratings.
///
/// Indices are dense and assigned in ascending code order, so sorting a rating
/// list by partner index is the same as sorting it by partner code.
#[derive(Debug, Clone)]
pub struct Registry {
    user_codes: Vec<u64>,
    item_codes: Vec<u64>,
    user_lookup: AHashMap<u64, usize>,
    item_lookup: AHashMap<u64, usize>,
    by_user: RatingLists,
    by_item: RatingLists,
    rating_average: f64,
}

impl Registry {
    /// Build the registry from `(user_code, item_code, rating)` triples.
    pub fn from_ratings<I>(ratings: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u64, u64, f64)>,
    {
        Self::from_parts(std::iter::empty(), std::iter::empty(), ratings)
    }

    /// Like [`Registry::from_ratings`], but also registers users and items that
    /// have no ratings (e.g. test-only users). Duplicate codes are merged.
    pub fn from_parts<U, T, I>(users: U, items: T, ratings: I) -> Result<Self>
    where
        U: IntoIterator<Item = u64>,
        T: IntoIterator<Item = u64>,
        I: IntoIterator<Item = (u64, u64, f64)>,
    {
        let raw: Vec<(u64, u64, f64)> = ratings.into_iter().collect();
        if raw.is_empty() {
            return Err(NdcgMfError::EmptyRegistry);
        }
        if let Some(&(user, item, _)) = raw.iter().find(|t| !t.2.is_finite()) {
            return Err(NdcgMfError::NonFiniteRating { user, item });
        }

        let mut user_codes: Vec<u64> = users.into_iter().chain(raw.iter().map(|t| t.0)).collect();
        user_codes.sort_unstable();
        user_codes.dedup();
        let mut item_codes: Vec<u64> = items.into_iter().chain(raw.iter().map(|t| t.1)).collect();
        item_codes.sort_unstable();
        item_codes.dedup();

        let user_lookup: AHashMap<u64, usize> =
            user_codes.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        let item_lookup: AHashMap<u64, usize> =
            item_codes.iter().enumerate().map(|(i, &c)| (c, i)).collect();

        let triples: Vec<(u32, u32, f64)> = raw
            .iter()
            .map(|&(u, i, r)| (user_lookup[&u] as u32, item_lookup[&i] as u32, r))
            .collect();

        let by_user = build_csr(&triples, user_codes.len()).map_err(|(u, i)| {
            NdcgMfError::DuplicateRating {
                user: user_codes[u as usize],
                item: item_codes[i as usize],
            }
        })?;
        let by_item = csr_transpose(&by_user, item_codes.len());

        let rating_average = raw.iter().map(|t| t.2).sum::<f64>() / raw.len() as f64;

        Ok(Self {
            user_codes,
            item_codes,
            user_lookup,
            item_lookup,
            by_user,
            by_item,
            rating_average,
        })
    }

    pub fn num_users(&self) -> usize {
        self.user_codes.len()
    }

    pub fn num_items(&self) -> usize {
        self.item_codes.len()
    }

    pub fn num_ratings(&self) -> usize {
        self.by_user.partners.len()
    }

    /// Mean of every rating in the registry.
    pub fn rating_average(&self) -> f64 {
        self.rating_average
    }

    /// Ratings of user `index`, partners are item indices. Panics if out of range.
    pub fn user(&self, index: usize) -> EntityRatings<'_> {
        let span = self.by_user.span(index);
        EntityRatings {
            index,
            code: self.user_codes[index],
            partners: &self.by_user.partners[span.clone()],
            ratings: &self.by_user.ratings[span],
        }
    }

    /// Ratings of item `index`, partners are user indices. Panics if out of range.
    pub fn item(&self, index: usize) -> EntityRatings<'_> {
        let span = self.by_item.span(index);
        EntityRatings {
            index,
            code: self.item_codes[index],
            partners: &self.by_item.partners[span.clone()],
            ratings: &self.by_item.ratings[span],
        }
    }

    pub fn users(&self) -> impl Iterator<Item = EntityRatings<'_>> {
        (0..self.num_users()).map(move |u| self.user(u))
    }

    pub fn items(&self) -> impl Iterator<Item = EntityRatings<'_>> {
        (0..self.num_items()).map(move |i| self.item(i))
    }

    pub fn user_index(&self, code: u64) -> Option<usize> {
        self.user_lookup.get(&code).copied()
    }

    pub fn item_index(&self, code: u64) -> Option<usize> {
        self.item_lookup.get(&code).copied()
    }

    /// Rating given by user `user` to item `item`, if any.
    pub fn rating(&self, user: usize, item: usize) -> Option<f64> {
        let u = self.user(user);
        u.position_of(item).map(|p| u.ratings[p])
    }

    pub(crate) fn check_user(&self, index: usize) -> Result<()> {
        if index < self.num_users() {
            Ok(())
        } else {
            Err(NdcgMfError::IndexOutOfRange {
                kind: "user",
                index,
                len: self.num_users(),
            })
        }
    }

    pub(crate) fn check_item(&self, index: usize) -> Result<()> {
        if index < self.num_items() {
            Ok(())
        } else {
            Err(NdcgMfError::IndexOutOfRange {
                kind: "item",
                index,
                len: self.num_items(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Registry {
        Registry::from_ratings(vec![
            (30, 7, 4.0),
            (10, 9, 2.0),
            (10, 7, 5.0),
            (20, 8, 1.0),
            (30, 9, 3.0),
        ])
        .unwrap()
    }

    #[test]
    fn indices_follow_code_order() {
        let reg = sample();
        assert_eq!(reg.num_users(), 3);
        assert_eq!(reg.num_items(), 3);
        assert_eq!(reg.user_index(10), Some(0));
        assert_eq!(reg.user_index(30), Some(2));
        assert_eq!(reg.item_index(9), Some(2));
        assert_eq!(reg.user_index(99), None);
        assert_eq!(reg.user(1).code, 20);
    }

    #[test]
    fn rating_lists_are_sorted_by_partner() {
        let reg = sample();
        let u0 = reg.user(0);
        assert_eq!(u0.partners, &[0, 2]);
        assert_eq!(u0.ratings, &[5.0, 2.0]);

        let i2 = reg.item(2);
        assert_eq!(i2.partners, &[0, 2]);
        assert_eq!(i2.ratings, &[2.0, 3.0]);

        for e in reg.users().chain(reg.items()) {
            assert!(e.partners.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn transpose_preserves_every_rating() {
        let reg = sample();
        assert_eq!(reg.num_ratings(), 5);
        for u in reg.users() {
            for (i, r) in u.iter() {
                let item = reg.item(i);
                let p = item.position_of(u.index).unwrap();
                assert_eq!(item.ratings[p], r);
            }
        }
        assert_eq!(reg.rating(2, 0), Some(4.0));
        assert_eq!(reg.rating(1, 0), None);
    }

    #[test]
    fn average_covers_all_ratings() {
        assert!((sample().rating_average() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_duplicates_and_bad_values() {
        let dup = Registry::from_ratings(vec![(1, 1, 3.0), (1, 2, 3.0), (1, 1, 4.0)]);
        assert!(matches!(dup, Err(NdcgMfError::DuplicateRating { user: 1, item: 1 })));

        let nan = Registry::from_ratings(vec![(1, 1, f64::NAN)]);
        assert!(matches!(nan, Err(NdcgMfError::NonFiniteRating { .. })));

        let empty = Registry::from_ratings(Vec::new());
        assert!(matches!(empty, Err(NdcgMfError::EmptyRegistry)));
    }

    #[test]
    fn unrated_entities_get_empty_lists() {
        let reg = Registry::from_parts([5, 40], [1], vec![(10, 7, 5.0), (20, 7, 3.0)]).unwrap();
        assert_eq!(reg.num_users(), 4);
        assert_eq!(reg.num_items(), 2);
        let lonely = reg.user(reg.user_index(40).unwrap());
        assert_eq!(lonely.num_ratings(), 0);
        assert_eq!(reg.item(0).code, 1);
        assert_eq!(reg.item(0).num_ratings(), 0);
        assert_eq!(reg.item(1).partners, &[1, 2]);
    }

    #[test]
    fn external_row_spans_are_checked() {
        let indptr = [0i64, 2, 2, 5];
        assert_eq!(csr_row_span(&indptr, 0, 5), Some(0..2));
        assert_eq!(csr_row_span(&indptr, 1, 5), Some(2..2));
        assert_eq!(csr_row_span(&indptr, 2, 5), Some(2..5));
        assert_eq!(csr_row_span(&indptr, 3, 5), None);
        assert_eq!(csr_row_span(&indptr, 2, 4), None);
        assert_eq!(csr_row_span(&[-3, 1], 0, 4), None);
        assert_eq!(csr_row_span(&[3, 1], 0, 4), None);
    }

    #[test]
    fn bounds_checks_report_the_entity() {
        let reg = sample();
        assert!(reg.check_user(2).is_ok());
        let err = reg.check_item(3).unwrap_err();
        assert!(matches!(err, NdcgMfError::IndexOutOfRange { kind: "item", index: 3, len: 3 }));
    }
}
