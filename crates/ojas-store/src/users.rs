//! CRUD operations for [`User`] records.

use rusqlite::params;

use ojas_shared::models::{User, UserSummary};
use ojas_shared::UserId;

use crate::codec::{parse_col, ts, ts_col};
use crate::database::Database;
use crate::error::{not_found, Result, StoreError};

const USER_COLUMNS: &str = "id, name, email, role, created_at";

impl Database {
    /// Insert a new user. Fails with [`StoreError::Conflict`] on a duplicate
    /// id or email.
    pub fn insert_user(&self, user: &User) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO users (id, name, email, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.as_str(),
                user.name,
                user.email,
                user.role.as_str(),
                ts(&user.created_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict(format!("user {}", user.email)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.as_str()],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn get_user_summary(&self, id: &UserId) -> Result<UserSummary> {
        self.get_user(id).map(|u| u.summary())
    }

    pub fn user_exists(&self, id: &UserId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: parse_col(row, 0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: parse_col(row, 3)?,
        created_at: ts_col(row, 4)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ojas_shared::clock;
    use ojas_shared::models::UserRole;

    pub(crate) fn make_user(db: &Database, id: &str, role: UserRole) -> User {
        let user = User {
            id: UserId::parse(id).unwrap(),
            name: format!("User {id}"),
            email: format!("{id}@ojas.test"),
            role,
            created_at: clock::now(),
        };
        db.insert_user(&user).unwrap();
        user
    }

    #[test]
    fn insert_and_fetch_user() {
        let db = Database::open_in_memory().unwrap();
        let user = make_user(&db, "u1", UserRole::Patient);

        assert_eq!(db.get_user(&user.id).unwrap(), user);
        assert!(db.user_exists(&user.id).unwrap());
        assert_eq!(db.get_user_summary(&user.id).unwrap().name, "User u1");
    }

    #[test]
    fn missing_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let ghost = UserId::parse("ghost").unwrap();
        assert!(matches!(db.get_user(&ghost), Err(StoreError::NotFound)));
        assert!(!db.user_exists(&ghost).unwrap());
    }

    #[test]
    fn duplicate_email_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let user = make_user(&db, "u1", UserRole::Patient);
        let dup = User {
            id: UserId::parse("u9").unwrap(),
            ..user
        };
        assert!(matches!(db.insert_user(&dup), Err(StoreError::Conflict(_))));
    }
}
