use objectstore_core::schema::{
    AttributeType, DeleteRule, Model, ModelBuilder, PropertyDescription, SchemaError, CREATED_AT,
    LOCAL_ID, UPDATED_AT,
};
use objectstore_core::Value;

#[test]
fn described_entities_carry_lifecycle_properties_once() {
    let model = library_model();

    for entity in model.entities() {
        for name in [LOCAL_ID, CREATED_AT, UPDATED_AT] {
            let declared = entity
                .properties()
                .iter()
                .filter(|property| property.name() == name)
                .count();
            assert_eq!(declared, 1, "{}.{name}", entity.name());
        }

        let identity_indexes = entity
            .indexes()
            .iter()
            .filter(|index| {
                index.elements.len() == 1 && index.elements[0].property == LOCAL_ID
            })
            .count();
        assert_eq!(identity_indexes, 1, "{} local_id index", entity.name());

        let identity_groups = entity
            .uniqueness_constraints()
            .iter()
            .filter(|group| group.as_slice() == [LOCAL_ID.to_string()])
            .count();
        assert_eq!(identity_groups, 1, "{} local_id uniqueness", entity.name());

        assert_eq!(
            entity.attribute(LOCAL_ID).unwrap().attribute_type,
            AttributeType::Uuid
        );
        assert_eq!(
            entity.attribute(CREATED_AT).unwrap().attribute_type,
            AttributeType::Date
        );
        assert_eq!(entity.managed_fields().len(), 3);
    }
}

#[test]
fn relationships_are_paired_in_both_directions() {
    let model = library_model();

    for entity in model.entities() {
        for (position, property) in entity.properties().iter().enumerate() {
            let PropertyDescription::Relationship(relationship) = property else {
                continue;
            };
            let forward = model
                .relationship_ref(entity.id(), &relationship.name)
                .unwrap();
            assert_eq!(forward.position, position);

            let inverse = model.relationship(relationship.inverse).unwrap();
            assert_eq!(inverse.destination, entity.id());
            assert_eq!(inverse.inverse, forward);

            let destination = model.entity(relationship.destination);
            let named = destination
                .properties()
                .iter()
                .filter(|candidate| candidate.name() == inverse.name)
                .count();
            assert_eq!(named, 1, "{}.{}", destination.name(), inverse.name);
        }
    }
}

#[test]
fn belongs_to_and_has_many_set_cardinalities() {
    let model = library_model();
    let book = model.entity_named("Book").unwrap();
    let author = model.entity_named("Author").unwrap();
    let shelf = model.entity_named("Shelf").unwrap();

    let written_by = book.relationship("author").unwrap();
    assert!(!written_by.is_to_many());
    assert!(written_by.is_required());
    assert_eq!(written_by.destination, author.id());

    let books = author.relationship("books").unwrap();
    assert!(books.is_to_many());
    assert!(!books.is_required());
    assert_eq!(books.delete_rule, DeleteRule::Cascade);

    let holds = shelf.relationship("books").unwrap();
    assert!(holds.is_to_many());
    let placed_on = book.relationship("shelf").unwrap();
    assert!(!placed_on.is_to_many());
    assert!(!placed_on.is_required());
}

#[test]
fn attribute_configuration_is_kept() {
    let model = library_model();
    let book = model.entity_named("Book").unwrap();

    let title = book.attribute("title").unwrap();
    assert!(!title.optional);
    assert_eq!(title.validators.len(), 1);

    let pages = book.attribute("pages").unwrap();
    assert!(pages.optional);
    assert_eq!(pages.default_value, Some(Value::Integer(0)));

    let index = book
        .indexes()
        .iter()
        .find(|index| index.name == "Book_index_title")
        .unwrap();
    assert_eq!(index.elements.len(), 1);
}

#[test]
fn try_index_reports_unknown_property() {
    let mut builder = ModelBuilder::new("Broken");
    builder.describe("Note", |entity| {
        let error = entity.try_index(&["missing"]).unwrap_err();
        assert_eq!(
            error,
            SchemaError::UnknownProperty {
                entity: "Note".to_string(),
                property: "missing".to_string(),
            }
        );
    });
    let model = builder.build();
    assert_eq!(model.entities()[0].indexes().len(), 1);
}

#[test]
#[should_panic(expected = "missing")]
fn index_on_unknown_property_panics() {
    let mut builder = ModelBuilder::new("Broken");
    builder.describe("Note", |entity| {
        entity.index(&["missing"]);
    });
}

#[test]
fn unmanaged_entities_skip_lifecycle_properties() {
    let mut builder = ModelBuilder::new("Legacy");
    builder.describe_unmanaged("Row", |entity| {
        entity.add_attribute("payload", AttributeType::Binary);
    });
    let model = builder.build();
    let row = model.entity_named("Row").unwrap();

    assert!(row.property(LOCAL_ID).is_none());
    assert!(row.indexes().is_empty());
    assert!(row.uniqueness_constraints().is_empty());
    assert!(row.managed_fields().is_empty());
}

fn library_model() -> Model {
    let mut builder = ModelBuilder::new("Library");
    let author = builder.describe("Author", |entity| {
        entity.add_attribute("name", AttributeType::String).required();
    });
    let shelf = builder.describe("Shelf", |entity| {
        entity.add_attribute("label", AttributeType::String);
    });
    builder.describe("Book", |entity| {
        entity
            .add_attribute("title", AttributeType::String)
            .required()
            .validate(
                objectstore_core::Predicate::this().length().ge(1),
                "title must not be empty",
            );
        entity
            .add_attribute("pages", AttributeType::Integer)
            .default_value(0);
        entity.index(&["title"]);
        entity
            .belongs_to(author, "author", "books")
            .inverse_delete_rule(DeleteRule::Cascade);
        entity.belongs_to(shelf, "shelf", "books").optional();
    });
    builder.build()
}
