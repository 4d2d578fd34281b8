use crate::expr::expression::{Expr, Expression};
use crate::expr::kinds::SqlKind;
use crate::expr::path::EntityPath;

/// One selected output of a query
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Whole entity, decoded into an `EntityRecord`
    Entity(EntityPath),
    /// Scalar expression, decoded into a `Value`
    Expr(Expr),
}

impl Projection {
    /// Name under which the cell can be looked up in a tuple
    pub fn label(&self) -> String {
        match self {
            Projection::Entity(path) => path.alias().to_string(),
            Projection::Expr(expr) => expr.label(),
        }
    }

    pub fn is_entity(&self) -> bool {
        matches!(self, Projection::Entity(_))
    }
}

impl From<&EntityPath> for Projection {
    fn from(path: &EntityPath) -> Self {
        Projection::Entity(path.clone())
    }
}

impl From<EntityPath> for Projection {
    fn from(path: EntityPath) -> Self {
        Projection::Entity(path)
    }
}

impl<T: SqlKind> From<Expression<T>> for Projection {
    fn from(expr: Expression<T>) -> Self {
        Projection::Expr(expr.into_expr())
    }
}

impl<T: SqlKind> From<&Expression<T>> for Projection {
    fn from(expr: &Expression<T>) -> Self {
        Projection::Expr(expr.expr().clone())
    }
}

/// Anything accepted by `select`: one projection, a tuple of them, or a list
pub trait IntoProjections {
    fn into_projections(self) -> Vec<Projection>;
}

impl IntoProjections for Projection {
    fn into_projections(self) -> Vec<Projection> {
        vec![self]
    }
}

impl IntoProjections for Vec<Projection> {
    fn into_projections(self) -> Vec<Projection> {
        self
    }
}

impl IntoProjections for &EntityPath {
    fn into_projections(self) -> Vec<Projection> {
        vec![Projection::from(self)]
    }
}

impl<T: SqlKind> IntoProjections for Expression<T> {
    fn into_projections(self) -> Vec<Projection> {
        vec![Projection::from(self)]
    }
}

impl<T: SqlKind> IntoProjections for &Expression<T> {
    fn into_projections(self) -> Vec<Projection> {
        vec![Projection::from(self)]
    }
}

macro_rules! impl_into_projections_for_tuple {
    ($($name:ident),+) => {
        impl<$($name: Into<Projection>),+> IntoProjections for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_projections(self) -> Vec<Projection> {
                let ($($name,)+) = self;
                vec![$($name.into()),+]
            }
        }
    };
}

impl_into_projections_for_tuple!(A, B);
impl_into_projections_for_tuple!(A, B, C);
impl_into_projections_for_tuple!(A, B, C, D);
impl_into_projections_for_tuple!(A, B, C, D, E);
impl_into_projections_for_tuple!(A, B, C, D, E, F);
impl_into_projections_for_tuple!(A, B, C, D, E, F, G);
impl_into_projections_for_tuple!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::kinds::{Int, Text};

    #[test]
    fn test_tuple_projection_labels() {
        let member = EntityPath::new("Member", "member");
        let projections = (
            member.column::<Text>("username"),
            member.column::<Int>("age").avg(),
            &member,
        )
            .into_projections();

        let labels: Vec<String> = projections.iter().map(Projection::label).collect();
        assert_eq!(labels, vec!["username", "avg(age)", "member"]);
        assert!(projections[2].is_entity());
    }
}
