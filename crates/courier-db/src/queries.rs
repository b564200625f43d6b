use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

use crate::Database;
use crate::models::{
    BlockListRow, FriendListRow, FriendRequestRow, MessageRow, PendingRequestRow, UserRow,
};

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        friend_code: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password, friend_code) VALUES (?1, ?2, ?3, ?4)",
                params![id, username, password_hash, friend_code],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_friend_code(&self, friend_code: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "friend_code", friend_code))
    }

    pub fn friend_code_exists(&self, friend_code: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let hit = conn
                .query_row(
                    "SELECT 1 FROM users WHERE friend_code = ?1",
                    [friend_code],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(hit.is_some())
        })
    }

    pub fn username_exists(&self, username: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let hit = conn
                .query_row("SELECT 1 FROM users WHERE username = ?1", [username], |_| {
                    Ok(())
                })
                .optional()?;
            Ok(hit.is_some())
        })
    }

    pub fn update_profile(
        &self,
        id: &str,
        username: &str,
        avatar_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET username = ?2, avatar_url = ?3 WHERE id = ?1",
                params![id, username, avatar_url],
            )?;
            Ok(())
        })
    }

    // -- Friendships --
    //
    // A friendship is two directed rows. Every write path here goes through a
    // transaction so the pair invariant cannot be broken halfway.

    pub fn are_friends(&self, user_id: &str, friend_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let hit = conn
                .query_row(
                    "SELECT 1 FROM friends WHERE user_id = ?1 AND friend_id = ?2",
                    [user_id, friend_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(hit.is_some())
        })
    }

    pub fn create_friendship(&self, user_id: &str, friend_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            insert_friend_pair(&tx, user_id, friend_id)?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn remove_friendship(&self, user_id: &str, friend_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM friends
                 WHERE (user_id = ?1 AND friend_id = ?2)
                    OR (user_id = ?2 AND friend_id = ?1)",
                [user_id, friend_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn list_friends(&self, user_id: &str) -> Result<Vec<FriendListRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT f.created_at,
                        u.id, u.username, u.password, u.friend_code, u.avatar_url, u.created_at
                 FROM friends f
                 JOIN users u ON f.friend_id = u.id
                 WHERE f.user_id = ?1
                 ORDER BY u.username ASC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(FriendListRow {
                        since: row.get(0)?,
                        friend: UserRow {
                            id: row.get(1)?,
                            username: row.get(2)?,
                            password: row.get(3)?,
                            friend_code: row.get(4)?,
                            avatar_url: row.get(5)?,
                            created_at: row.get(6)?,
                        },
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Friend requests --

    pub fn insert_friend_request(&self, id: &str, sender_id: &str, receiver_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO friend_requests (id, sender_id, receiver_id) VALUES (?1, ?2, ?3)",
                params![id, sender_id, receiver_id],
            )?;
            Ok(())
        })
    }

    pub fn find_request(&self, sender_id: &str, receiver_id: &str) -> Result<Option<FriendRequestRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, sender_id, receiver_id, created_at
                     FROM friend_requests
                     WHERE sender_id = ?1 AND receiver_id = ?2",
                    [sender_id, receiver_id],
                    row_to_request,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_friend_request(&self, id: &str) -> Result<Option<FriendRequestRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, sender_id, receiver_id, created_at
                     FROM friend_requests
                     WHERE id = ?1",
                    [id],
                    row_to_request,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn delete_friend_request(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM friend_requests WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    pub fn list_pending_requests(&self, receiver_id: &str) -> Result<Vec<PendingRequestRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.created_at,
                        u.id, u.username, u.password, u.friend_code, u.avatar_url, u.created_at
                 FROM friend_requests r
                 JOIN users u ON r.sender_id = u.id
                 WHERE r.receiver_id = ?1
                 ORDER BY r.created_at ASC",
            )?;

            let rows = stmt
                .query_map([receiver_id], |row| {
                    Ok(PendingRequestRow {
                        id: row.get(0)?,
                        created_at: row.get(1)?,
                        sender: UserRow {
                            id: row.get(2)?,
                            username: row.get(3)?,
                            password: row.get(4)?,
                            friend_code: row.get(5)?,
                            avatar_url: row.get(6)?,
                            created_at: row.get(7)?,
                        },
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Resolve a request (or a pair of crossed requests) into a friendship.
    /// One transaction: both pending rows between the pair are deleted and
    /// both directed friendship rows are inserted, or nothing happens at all.
    /// `INSERT OR IGNORE` absorbs the race where both sides resolved
    /// concurrently and one pair of rows already exists.
    pub fn accept_into_friendship(&self, user_id: &str, friend_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM friend_requests
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)",
                [user_id, friend_id],
            )?;
            insert_friend_pair(&tx, user_id, friend_id)?;
            tx.commit()?;
            Ok(())
        })
    }

    // -- Blocks --

    pub fn insert_block(&self, blocker_id: &str, blocked_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO blocks (blocker_id, blocked_id) VALUES (?1, ?2)",
                [blocker_id, blocked_id],
            )?;
            Ok(())
        })
    }

    /// Returns false if there was no block record to remove.
    pub fn delete_block(&self, blocker_id: &str, blocked_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
                [blocker_id, blocked_id],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn block_exists(&self, blocker_id: &str, blocked_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let hit = conn
                .query_row(
                    "SELECT 1 FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
                    [blocker_id, blocked_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(hit.is_some())
        })
    }

    /// A block in either direction between the pair.
    pub fn block_exists_between(&self, a: &str, b: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let hit = conn
                .query_row(
                    "SELECT 1 FROM blocks
                     WHERE (blocker_id = ?1 AND blocked_id = ?2)
                        OR (blocker_id = ?2 AND blocked_id = ?1)",
                    [a, b],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(hit.is_some())
        })
    }

    pub fn list_blocks(&self, blocker_id: &str) -> Result<Vec<BlockListRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT b.created_at,
                        u.id, u.username, u.password, u.friend_code, u.avatar_url, u.created_at
                 FROM blocks b
                 JOIN users u ON b.blocked_id = u.id
                 WHERE b.blocker_id = ?1
                 ORDER BY b.created_at DESC",
            )?;

            let rows = stmt
                .query_map([blocker_id], |row| {
                    Ok(BlockListRow {
                        blocked_at: row.get(0)?,
                        blocked: UserRow {
                            id: row.get(1)?,
                            username: row.get(2)?,
                            password: row.get(3)?,
                            friend_code: row.get(4)?,
                            avatar_url: row.get(5)?,
                            created_at: row.get(6)?,
                        },
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn blocked_ids(&self, blocker_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT blocked_id FROM blocks WHERE blocker_id = ?1")?;
            let rows = stmt
                .query_map([blocker_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Deleted chats --

    pub fn chat_hidden(&self, user_id: &str, other_user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let hit = conn
                .query_row(
                    "SELECT 1 FROM deleted_chats WHERE user_id = ?1 AND other_user_id = ?2",
                    [user_id, other_user_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(hit.is_some())
        })
    }

    pub fn hide_chat(&self, user_id: &str, other_user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO deleted_chats (user_id, other_user_id) VALUES (?1, ?2)",
                [user_id, other_user_id],
            )?;
            Ok(())
        })
    }

    pub fn hidden_chat_ids(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT other_user_id FROM deleted_chats WHERE user_id = ?1")?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
        kind: &str,
        content: Option<&str>,
        media_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, kind, content, media_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, sender_id, receiver_id, kind, content, media_url],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("{MESSAGE_SELECT} WHERE m.id = ?1"),
                    [id],
                    row_to_message,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// All messages between the pair, oldest first. The rowid tiebreaker
    /// keeps insertion order when two rows land in the same second.
    pub fn list_conversation(&self, a: &str, b: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_SELECT}
                 WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
                    OR (m.sender_id = ?2 AND m.receiver_id = ?1)
                 ORDER BY m.created_at ASC, m.rowid ASC"
            ))?;

            let rows = stmt
                .query_map([a, b], row_to_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn last_message_between(&self, a: &str, b: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!(
                        "{MESSAGE_SELECT}
                         WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
                            OR (m.sender_id = ?2 AND m.receiver_id = ?1)
                         ORDER BY m.created_at DESC, m.rowid DESC
                         LIMIT 1"
                    ),
                    [a, b],
                    row_to_message,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Bulk-mark everything sender -> receiver as seen. Returns the number of
    /// rows that actually changed.
    pub fn mark_seen(&self, sender_id: &str, receiver_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = 'seen'
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND status != 'seen'",
                [sender_id, receiver_id],
            )?;
            Ok(changed)
        })
    }

    pub fn set_message_status(&self, id: &str, status: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET status = ?2 WHERE id = ?1",
                [id, status],
            )?;
            Ok(())
        })
    }
}

const MESSAGE_SELECT: &str =
    "SELECT m.id, m.sender_id, m.receiver_id, m.kind, m.content, m.media_url,
            m.status, m.created_at, u.username
     FROM messages m
     LEFT JOIN users u ON m.sender_id = u.id";

fn insert_friend_pair(tx: &rusqlite::Transaction<'_>, a: &str, b: &str) -> Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO friends (user_id, friend_id) VALUES (?1, ?2)",
        [a, b],
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO friends (user_id, friend_id) VALUES (?1, ?2)",
        [b, a],
    )?;
    Ok(())
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT id, username, password, friend_code, avatar_url, created_at
                 FROM users WHERE {column} = ?1"
            ),
            [value],
            row_to_user,
        )
        .optional()?;
    Ok(row)
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        friend_code: row.get(3)?,
        avatar_url: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<FriendRequestRow> {
    Ok(FriendRequestRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        kind: row.get(3)?,
        content: row.get(4)?,
        media_url: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
        sender_username: row
            .get::<_, Option<String>>(8)?
            .unwrap_or_else(|| "unknown".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn add_user(db: &Database, username: &str, friend_code: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(&id, username, "hash", friend_code).unwrap();
        id
    }

    #[test]
    fn friendship_rows_exist_in_pairs() {
        let db = test_db();
        let a = add_user(&db, "alice", "AAA111");
        let b = add_user(&db, "bob", "BBB222");

        db.create_friendship(&a, &b).unwrap();
        assert!(db.are_friends(&a, &b).unwrap());
        assert!(db.are_friends(&b, &a).unwrap());

        db.remove_friendship(&b, &a).unwrap();
        assert!(!db.are_friends(&a, &b).unwrap());
        assert!(!db.are_friends(&b, &a).unwrap());
    }

    #[test]
    fn accept_deletes_requests_both_directions() {
        let db = test_db();
        let a = add_user(&db, "alice", "AAA111");
        let b = add_user(&db, "bob", "BBB222");

        // Crossed requests, both pending
        db.insert_friend_request(&Uuid::new_v4().to_string(), &a, &b)
            .unwrap();
        db.insert_friend_request(&Uuid::new_v4().to_string(), &b, &a)
            .unwrap();

        db.accept_into_friendship(&a, &b).unwrap();

        assert!(db.are_friends(&a, &b).unwrap());
        assert!(db.are_friends(&b, &a).unwrap());
        assert!(db.find_request(&a, &b).unwrap().is_none());
        assert!(db.find_request(&b, &a).unwrap().is_none());
    }

    #[test]
    fn accept_tolerates_existing_friendship() {
        let db = test_db();
        let a = add_user(&db, "alice", "AAA111");
        let b = add_user(&db, "bob", "BBB222");

        db.create_friendship(&a, &b).unwrap();
        // Second resolution of the same pair must not fail
        db.accept_into_friendship(&a, &b).unwrap();
        assert!(db.are_friends(&a, &b).unwrap());
    }

    #[test]
    fn duplicate_friend_request_is_a_constraint_error() {
        let db = test_db();
        let a = add_user(&db, "alice", "AAA111");
        let b = add_user(&db, "bob", "BBB222");

        db.insert_friend_request(&Uuid::new_v4().to_string(), &a, &b)
            .unwrap();
        let dup = db.insert_friend_request(&Uuid::new_v4().to_string(), &a, &b);
        assert!(dup.is_err());
    }

    #[test]
    fn duplicate_username_and_friend_code_rejected() {
        let db = test_db();
        add_user(&db, "alice", "AAA111");

        let same_name = db.create_user(&Uuid::new_v4().to_string(), "alice", "hash", "ZZZ999");
        assert!(same_name.is_err());

        let same_code = db.create_user(&Uuid::new_v4().to_string(), "bob", "hash", "AAA111");
        assert!(same_code.is_err());
    }

    #[test]
    fn mark_seen_only_touches_inbound_messages() {
        let db = test_db();
        let a = add_user(&db, "alice", "AAA111");
        let b = add_user(&db, "bob", "BBB222");

        db.insert_message(&Uuid::new_v4().to_string(), &b, &a, "text", Some("one"), None)
            .unwrap();
        db.insert_message(&Uuid::new_v4().to_string(), &b, &a, "text", Some("two"), None)
            .unwrap();
        db.insert_message(&Uuid::new_v4().to_string(), &a, &b, "text", Some("mine"), None)
            .unwrap();

        let changed = db.mark_seen(&b, &a).unwrap();
        assert_eq!(changed, 2);

        for row in db.list_conversation(&a, &b).unwrap() {
            if row.sender_id == b {
                assert_eq!(row.status, "seen");
            } else {
                assert_eq!(row.status, "sent");
            }
        }
    }

    #[test]
    fn conversation_is_oldest_first() {
        let db = test_db();
        let a = add_user(&db, "alice", "AAA111");
        let b = add_user(&db, "bob", "BBB222");

        for text in ["first", "second", "third"] {
            db.insert_message(&Uuid::new_v4().to_string(), &a, &b, "text", Some(text), None)
                .unwrap();
        }

        let contents: Vec<_> = db
            .list_conversation(&a, &b)
            .unwrap()
            .into_iter()
            .map(|m| m.content.unwrap())
            .collect();
        assert_eq!(contents, ["first", "second", "third"]);

        let last = db.last_message_between(&a, &b).unwrap().unwrap();
        assert_eq!(last.content.as_deref(), Some("third"));
    }

    #[test]
    fn friend_code_request_accept_flow() {
        let db = test_db();
        let a = add_user(&db, "alice", "ABC123");
        let b = add_user(&db, "bob", "XYZ789");

        // Alice finds Bob by his code and opens a request
        let target = db.get_user_by_friend_code("XYZ789").unwrap().unwrap();
        assert_eq!(target.id, b);
        db.insert_friend_request(&Uuid::new_v4().to_string(), &a, &target.id)
            .unwrap();

        // Bob sees exactly one pending request, from Alice
        let pending = db.list_pending_requests(&b).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sender.username, "alice");

        // Accepting yields both directed rows and no remaining request
        db.accept_into_friendship(&b, &a).unwrap();
        assert!(db.are_friends(&a, &b).unwrap());
        assert!(db.are_friends(&b, &a).unwrap());
        assert!(db.list_pending_requests(&b).unwrap().is_empty());
    }

    #[test]
    fn block_lookup_covers_both_directions() {
        let db = test_db();
        let a = add_user(&db, "alice", "AAA111");
        let b = add_user(&db, "bob", "BBB222");

        db.insert_block(&a, &b).unwrap();
        assert!(db.block_exists(&a, &b).unwrap());
        assert!(!db.block_exists(&b, &a).unwrap());
        assert!(db.block_exists_between(&a, &b).unwrap());
        assert!(db.block_exists_between(&b, &a).unwrap());

        assert!(db.delete_block(&a, &b).unwrap());
        assert!(!db.delete_block(&a, &b).unwrap());
        assert!(!db.block_exists_between(&b, &a).unwrap());
    }

    #[test]
    fn hide_chat_marker_is_per_direction() {
        let db = test_db();
        let a = add_user(&db, "alice", "AAA111");
        let b = add_user(&db, "bob", "BBB222");

        db.hide_chat(&a, &b).unwrap();
        assert!(db.chat_hidden(&a, &b).unwrap());
        assert!(!db.chat_hidden(&b, &a).unwrap());
        assert_eq!(db.hidden_chat_ids(&a).unwrap(), vec![b.clone()]);
    }
}
