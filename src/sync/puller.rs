//! Pages server deltas by USN into ordered fragments.

use crate::error::RpcError;
use crate::rpc::{ServerClient, SyncFragment};

/// One page of the server's delta feed, plus the USN derived from the
/// records it actually carries (the wire response only carries
/// `user_max_usn`, the user's overall high-water mark).
#[derive(Debug, Clone)]
pub struct Fragment {
    pub notes: Vec<crate::rpc::NoteWire>,
    pub books: Vec<crate::rpc::BookWire>,
    pub full_sync_before: i64,
    pub max_usn_in_page: i64,
    pub current_time: i64,
    pub user_max_usn: i64,
}

impl From<(SyncFragment, i64)> for Fragment {
    fn from((wire, after_usn): (SyncFragment, i64)) -> Self {
        let max_usn_in_page = wire
            .books
            .iter()
            .map(|b| b.usn)
            .chain(wire.notes.iter().map(|n| n.usn))
            .max()
            .unwrap_or(after_usn);
        Fragment {
            notes: wire.notes,
            books: wire.books,
            full_sync_before: wire.full_sync_before,
            max_usn_in_page,
            current_time: wire.current_time,
            user_max_usn: wire.user_max_usn,
        }
    }
}

pub struct FragmentPuller<'a> {
    client: &'a dyn ServerClient,
}

impl<'a> FragmentPuller<'a> {
    pub fn new(client: &'a dyn ServerClient) -> Self {
        FragmentPuller { client }
    }

    /// Pulls and collects every fragment starting after `after_usn`, in
    /// ascending USN order. Restartable: callers that observe a transient
    /// error partway through can re-invoke with the last fully-consumed
    /// fragment's `max_usn_in_page`.
    pub async fn pull_all(&self, after_usn: i64) -> Result<Vec<Fragment>, RpcError> {
        let mut fragments = Vec::new();
        let mut cursor = after_usn;
        let mut last_seen_max = after_usn;

        loop {
            let wire = self.client.get_sync_fragment(cursor).await?;
            let page_empty = wire.notes.is_empty() && wire.books.is_empty();
            let user_max_usn = wire.user_max_usn;
            let fragment: Fragment = (wire, cursor).into();
            cursor = fragment.max_usn_in_page.max(cursor);

            let terminate = page_empty || user_max_usn == last_seen_max;
            last_seen_max = user_max_usn;
            fragments.push(fragment);

            if terminate {
                break;
            }
        }

        Ok(fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::fake::FakeServerClient;

    #[tokio::test]
    async fn pull_all_terminates_on_empty_page() {
        let server = FakeServerClient::new();
        let book = server.seed_book("js");
        server.seed_note(book, "hello", 1);

        let puller = FragmentPuller::new(&server);
        let fragments = puller.pull_all(0).await.unwrap();

        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].books.len(), 1);
        assert_eq!(fragments[0].notes.len(), 1);
    }

    #[tokio::test]
    async fn pull_all_from_current_usn_yields_nothing_new() {
        let server = FakeServerClient::new();
        let book = server.seed_book("js");
        server.seed_note(book, "hello", 1);

        let puller = FragmentPuller::new(&server);
        let fragments = puller.pull_all(2).await.unwrap();

        assert!(fragments.iter().all(|f| f.books.is_empty() && f.notes.is_empty()));
    }
}
