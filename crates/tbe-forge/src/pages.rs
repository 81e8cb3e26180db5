//! Lazy pagination over container package versions.

use futures::stream::{self, Stream};

use crate::api::{HostingApi, PackageOwner};
use crate::types::PackageVersion;
use crate::Result;

/// Stream of package-version pages, starting at page 1.
///
/// Each page is requested only when the consumer polls for it, so a caller
/// that stops early never fetches the remaining pages. The stream ends after
/// the first page that advertises no next page, or after the first error.
pub fn package_version_pages<'a, A>(
    api: &'a A,
    owner: &'a PackageOwner,
    package: &'a str,
) -> impl Stream<Item = Result<Vec<PackageVersion>>> + Send + 'a
where
    A: HostingApi + ?Sized,
{
    stream::try_unfold(Some(1u32), move |page| async move {
        let Some(page) = page else {
            return Ok(None);
        };
        let result = api.list_package_versions(owner, package, page).await?;
        Ok(Some((result.items, result.next_page)))
    })
}
