use objectstore_core::db::DbError;
use objectstore_core::{
    AttributeType, DeleteRule, Error, FetchRequest, ManagerConfig, Model, ModelBuilder,
    ModelObject, ObjectId, Predicate, Record, StoreManager,
};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

struct Author(Record);

impl ModelObject for Author {
    const ENTITY: &'static str = "Author";

    fn from_record(record: Record) -> Self {
        Self(record)
    }

    fn record(&self) -> &Record {
        &self.0
    }
}

impl Author {
    fn name(&self) -> Option<String> {
        self.0.get_string("name")
    }
}

#[test]
fn find_returns_stable_identity_and_timestamps() {
    let manager = loaded_manager();
    let local_id = insert_author(&manager, "Ursula");

    let lookup = move |context: &mut objectstore_core::SessionContext| {
        context
            .find("Author", local_id)
            .map(|record| (record.local_id(), record.created_at(), record.updated_at()))
    };
    let first = manager.view_session().perform_and_wait(lookup).unwrap().unwrap();
    let second = manager.view_session().perform_and_wait(lookup).unwrap().unwrap();
    let elsewhere = manager.run_in_background(lookup).wait().unwrap().unwrap();

    assert_eq!(first.0, Some(local_id));
    assert!(first.1.is_some());
    assert!(first.2.is_some());
    assert_eq!(first, second);
    assert_eq!(first, elsewhere);
}

#[test]
fn find_without_match_is_not_found() {
    let manager = loaded_manager();
    insert_author(&manager, "Octavia");
    let unknown = Uuid::new_v4();

    let outcome = manager
        .view_session()
        .perform_and_wait(move |context| context.find("Author", unknown).map(|_| ()))
        .unwrap();
    assert!(matches!(outcome, Err(Error::NotFound(id)) if id == unknown));
}

#[test]
fn typed_wrapper_uses_record_lifecycle() {
    let manager = loaded_manager();

    let (local_id, names) = manager
        .view_session()
        .perform_and_wait(|context| {
            let author = Author::insert(context)?;
            author.record().set("name", "Iain")?;
            context.save()?;
            let local_id = author.local_id().expect("identity assigned on insert");

            let found = Author::find(local_id, context)?;
            assert_eq!(found.object_id(), author.object_id());
            assert_eq!(found.created_at(), author.created_at());

            let names = Author::fetch_all(context)?
                .iter()
                .map(Author::name)
                .collect::<Vec<_>>();
            Ok::<_, Error>((local_id, names))
        })
        .unwrap()
        .unwrap();

    assert!(!local_id.is_nil());
    assert_eq!(names, vec![Some("Iain".to_string())]);
}

#[test]
fn save_refreshes_updated_at_only() {
    let manager = loaded_manager();
    let local_id = insert_author(&manager, "Kim");
    let before = timestamps(&manager, local_id);

    thread::sleep(Duration::from_millis(5));
    manager
        .view_session()
        .perform_and_wait(move |context| {
            context.find("Author", local_id)?.set("name", "Kim S.")?;
            context.save()
        })
        .unwrap()
        .unwrap();
    let after = timestamps(&manager, local_id);

    assert_eq!(after.0, before.0);
    assert!(after.1 > before.1);
}

#[test]
fn identity_cannot_be_reassigned() {
    let manager = loaded_manager();
    let outcome = manager
        .view_session()
        .perform_and_wait(|context| {
            let author = context.insert("Author")?;
            author.set("local_id", Uuid::new_v4())
        })
        .unwrap();
    assert!(matches!(
        outcome,
        Err(Error::ImmutableProperty { property, .. }) if property == "local_id"
    ));
}

#[test]
fn assignments_are_type_checked() {
    let manager = loaded_manager();
    let outcome = manager
        .view_session()
        .perform_and_wait(|context| {
            let book = context.insert("Book")?;
            let wrong_type = book.set("pages", "many");
            let unknown = book.set("isbn", "978-0");
            let shelf = context.insert("Shelf")?;
            let wrong_target = book.set_related("author", Some(&shelf));
            context.rollback();
            Ok::<_, Error>((wrong_type, unknown, wrong_target))
        })
        .unwrap()
        .unwrap();

    assert!(matches!(outcome.0, Err(Error::TypeMismatch { .. })));
    assert!(matches!(outcome.1, Err(Error::UnknownProperty { .. })));
    assert!(matches!(outcome.2, Err(Error::TypeMismatch { .. })));
}

#[test]
fn save_validates_attributes_and_relationships() {
    let manager = loaded_manager();
    let messages = manager
        .view_session()
        .perform_and_wait(|context| {
            let mut messages = Vec::new();

            let author = context.insert("Author")?;
            messages.push(validation_message(context.save()));
            author.set("name", "Mary")?;
            context.save()?;

            let book = context.insert("Book")?;
            book.set("title", "")?;
            book.set_related("author", Some(&author))?;
            messages.push(validation_message(context.save()));

            book.set("title", "Frankenstein")?;
            book.set_related("author", None)?;
            messages.push(validation_message(context.save()));

            book.set_related("author", Some(&author))?;
            context.save()?;
            Ok::<_, Error>(messages)
        })
        .unwrap()
        .unwrap();

    assert_eq!(
        messages,
        vec![
            "name: value is required".to_string(),
            "title: title must not be empty".to_string(),
            "author: relationship is required".to_string(),
        ]
    );
}

#[test]
fn unique_groups_reject_duplicates_without_partial_writes() {
    let manager = loaded_manager();
    let outcome = manager
        .view_session()
        .perform_and_wait(|context| {
            for name in ["first", "second"] {
                let author = context.insert("Author")?;
                author.set("name", name)?;
                author.set("email", "same@example.com")?;
            }
            context.save()
        })
        .unwrap();
    assert!(matches!(
        outcome,
        Err(Error::Db(DbError::ConstraintViolation(_)))
    ));

    let stored = manager
        .run_in_background(|context| context.count(&FetchRequest::new("Author")))
        .wait()
        .unwrap()
        .unwrap();
    assert_eq!(stored, 0);
}

#[test]
fn deleting_a_parent_cascades_to_members() {
    let manager = loaded_manager();
    let team = manager
        .view_session()
        .perform_and_wait(|context| {
            let team = context.insert("Team")?;
            for name in ["Ada", "Charles"] {
                let member = context.insert("Member")?;
                member.set("name", name)?;
                member.set_related("team", Some(&team))?;
            }
            context.save()?;
            Ok::<_, Error>(team.object_id())
        })
        .unwrap()
        .unwrap();

    let remaining = manager
        .run_in_background(move |context| {
            let team = context.existing(team)?;
            assert_eq!(context.related(&team, "members")?.len(), 2);
            context.delete(&team);
            context.save()?;
            context.count(&FetchRequest::new("Member"))
        })
        .wait()
        .unwrap()
        .unwrap();
    assert_eq!(remaining, 0);

    let gone = manager
        .run_in_background(move |context| context.existing(team).map(|_| ()))
        .wait()
        .unwrap()
        .unwrap_err();
    assert!(matches!(gone.as_ref(), Error::ObjectNotFound(id) if *id == team));
}

#[test]
fn deny_rule_blocks_delete_until_rolled_back() {
    let manager = loaded_manager();
    let outcome = manager
        .view_session()
        .perform_and_wait(|context| {
            let author = context.insert("Author")?;
            author.set("name", "Ted")?;
            let book = context.insert("Book")?;
            book.set("title", "Stories of Your Life")?;
            book.set_related("author", Some(&author))?;
            context.save()?;

            context.delete(&author);
            let denied = context.save();
            context.rollback();
            let authors = context.count(&FetchRequest::new("Author"))?;
            Ok::<_, Error>((denied, authors, context.has_changes()))
        })
        .unwrap()
        .unwrap();

    assert!(matches!(
        outcome.0,
        Err(Error::DeleteDenied { ref entity, ref relationship })
            if entity == "Author" && relationship == "books"
    ));
    assert_eq!(outcome.1, 1);
    assert!(!outcome.2);
}

#[test]
fn nullify_rule_clears_the_inverse_link() {
    let manager = loaded_manager();
    let book = manager
        .view_session()
        .perform_and_wait(|context| {
            let author = context.insert("Author")?;
            author.set("name", "Le Guin")?;
            let shelf = context.insert("Shelf")?;
            let book = context.insert("Book")?;
            book.set("title", "The Dispossessed")?;
            book.set_related("author", Some(&author))?;
            book.set_related("shelf", Some(&shelf))?;
            context.save()?;

            context.delete(&shelf);
            context.save()?;
            Ok::<_, Error>(book.object_id())
        })
        .unwrap()
        .unwrap();

    let shelf = manager
        .run_in_background(move |context| {
            let book = context.existing(book)?;
            Ok(book.related_id("shelf"))
        })
        .wait()
        .unwrap()
        .unwrap();
    assert_eq!(shelf, None);
}

#[test]
fn objects_are_handed_across_sessions_by_id() {
    let manager = loaded_manager();
    let id: ObjectId = manager
        .run_in_background(|context| {
            let author = context.insert("Author")?;
            author.set("name", "N. K. Jemisin")?;
            context.save()?;
            Ok(author.object_id())
        })
        .wait()
        .unwrap()
        .unwrap();

    let name = manager
        .view_session()
        .perform_and_wait(move |context| {
            context
                .existing(id)
                .map(|author| author.get_string("name"))
        })
        .unwrap()
        .unwrap();
    assert_eq!(name.as_deref(), Some("N. K. Jemisin"));
}

#[test]
fn rollback_discards_inserts_and_edits() {
    let manager = loaded_manager();
    let local_id = insert_author(&manager, "Gene");

    let (count, name) = manager
        .view_session()
        .perform_and_wait(move |context| {
            context.insert("Author")?.set("name", "Unsaved")?;
            let existing = context.find("Author", local_id)?;
            existing.set("name", "Renamed")?;
            assert!(context.has_changes());

            context.rollback();
            let count = context.count(&FetchRequest::new("Author"))?;
            Ok::<_, Error>((count, existing.get_string("name")))
        })
        .unwrap()
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(name.as_deref(), Some("Gene"));
}

#[test]
fn fetch_applies_predicate_sort_and_paging() {
    let manager = loaded_manager();
    for name in ["Carol", "alice", "Bob", "Dave"] {
        insert_author(&manager, name);
    }

    let names = manager
        .view_session()
        .perform_and_wait(|context| {
            let request = FetchRequest::new("Author")
                .predicate(Predicate::key("name").ne("Dave"))
                .sort_by("name", true)
                .offset(1)
                .limit(2);
            context.fetch(&request).map(|authors| {
                authors
                    .iter()
                    .filter_map(|author| author.get_string("name"))
                    .collect::<Vec<_>>()
            })
        })
        .unwrap()
        .unwrap();

    assert_eq!(names, vec!["Carol".to_string(), "alice".to_string()]);
}

fn validation_message(outcome: objectstore_core::Result<()>) -> String {
    match outcome {
        Err(Error::Validation {
            property, message, ..
        }) => format!("{property}: {message}"),
        other => panic!("expected a validation error, got {other:?}"),
    }
}

fn timestamps(manager: &StoreManager, local_id: Uuid) -> (Option<i64>, Option<i64>) {
    manager
        .run_in_background(move |context| {
            context
                .find("Author", local_id)
                .map(|author| (author.created_at(), author.updated_at()))
        })
        .wait()
        .unwrap()
        .unwrap()
}

fn insert_author(manager: &StoreManager, name: &'static str) -> Uuid {
    manager
        .view_session()
        .perform_and_wait(move |context| {
            let author = context.insert("Author")?;
            author.set("name", name)?;
            context.save()?;
            Ok::<_, Error>(author.local_id().expect("identity assigned on insert"))
        })
        .unwrap()
        .unwrap()
}

fn library_model() -> Model {
    let mut builder = ModelBuilder::new("Library");
    let author = builder.describe("Author", |entity| {
        entity.add_attribute("name", AttributeType::String).required();
        entity.add_attribute("email", AttributeType::String);
        entity.unique(&["email"]);
    });
    let shelf = builder.describe("Shelf", |entity| {
        entity.add_attribute("label", AttributeType::String);
    });
    builder.describe("Book", |entity| {
        entity
            .add_attribute("title", AttributeType::String)
            .required()
            .validate(Predicate::this().length().ge(1), "title must not be empty");
        entity.add_attribute("pages", AttributeType::Integer);
        entity
            .belongs_to(author, "author", "books")
            .inverse_delete_rule(DeleteRule::Deny);
        entity.belongs_to(shelf, "shelf", "books").optional();
    });
    let team = builder.describe("Team", |_| {});
    builder.describe("Member", |entity| {
        entity.add_attribute("name", AttributeType::String);
        entity
            .belongs_to(team, "team", "members")
            .inverse_delete_rule(DeleteRule::Cascade);
    });
    builder.build()
}

fn loaded_manager() -> StoreManager {
    let manager = StoreManager::with_config(
        "library",
        library_model(),
        ManagerConfig {
            finishing_threads: 1,
            ..ManagerConfig::default()
        },
    )
    .unwrap();
    manager.prepare_in_memory();
    manager.load_stores().unwrap();
    manager
}
