use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};

use deriva::compile::Compiler;
use deriva::derive::parse_method;
use deriva::query::{QuerySpec, ResultShape};
use deriva::schema::{EntityDescriptor, SchemaRegistry};
use deriva::template::{CompiledTemplate, compile_template};
use deriva::value::ScalarType;

fn registry() -> SchemaRegistry {
    SchemaRegistry::builder()
        .entity(
            EntityDescriptor::new("Team", "team")
                .id("id", "team_id")
                .field("name", ScalarType::Text, false)
                .has_many("members", "Member", "team"),
        )
        .entity(
            EntityDescriptor::new("Member", "member")
                .id("id", "member_id")
                .field("username", ScalarType::Text, false)
                .field("age", ScalarType::Integer, false)
                .belongs_to("team", "Team", "team_id"),
        )
        .build()
        .unwrap()
}

fn derivation(c: &mut Criterion) {
    let registry = registry();
    let member = registry.entity("Member").unwrap();
    c.bench_function("parse_method", |b| {
        b.iter(|| {
            parse_method(
                black_box("findTop3ByUsernameAndAgeGreaterThanOrTeamNameLikeOrderByAgeDesc"),
                &member,
                &registry,
            )
            .unwrap()
        })
    });
    c.bench_function("parse_and_compile_method", |b| {
        let compiler = Compiler::new(&registry);
        b.iter(|| {
            let parsed = parse_method(black_box("findByTeamNameAndAgeLessThanEqual"), &member, &registry).unwrap();
            let mut spec = QuerySpec::new(Arc::clone(&member), ResultShape::Page);
            spec.predicate = parsed.predicate;
            spec.params = parsed.params;
            compiler.compile(&spec, "findByTeamNameAndAgeLessThanEqual").unwrap()
        })
    });
}

fn templates(c: &mut Criterion) {
    let registry = registry();
    c.bench_function("compile_template", |b| {
        b.iter(|| {
            match compile_template(
                "findMemberDto",
                black_box("select new MemberDto(m.id, m.username, t.name) from Member m join m.team t where m.age > :age order by m.username desc"),
                &registry,
            )
            .unwrap()
            {
                CompiledTemplate::Select(select) => select,
                CompiledTemplate::Bulk(_) => unreachable!(),
            }
        })
    });
}

criterion_group!(benches, derivation, templates);
criterion_main!(benches);
