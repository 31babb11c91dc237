use rustc_hash::{FxHashMap, FxHashSet};

use flow_frontend::ast::Type;

/// Signature of a callable: free function, method, builtin, or foreign
/// function from a `link` block.
#[derive(Debug, Clone, PartialEq)]
pub struct FnSig {
    pub params: Vec<Type>,
    pub ret: Type,
    /// `...` in a `link` signature: arity check covers only the fixed
    /// prefix and any trailing argument types are accepted.
    pub variadic: bool,
}

impl FnSig {
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Self {
            params,
            ret,
            variadic: false,
        }
    }
}

/// A registered struct: fields in declaration order (the order is the
/// memory layout the lowering pass uses).
#[derive(Debug, Clone, Default)]
pub struct StructInfo {
    pub fields: Vec<(String, Type)>,
}

impl StructInfo {
    pub fn field(&self, name: &str) -> Option<(usize, &Type)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, (n, _))| n == name)
            .map(|(i, (_, t))| (i, t))
    }
}

/// Interns user-declared type information: aliases, struct layouts, method
/// and function signatures. Alias resolution and type equality live here.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    aliases: FxHashMap<String, Type>,
    structs: FxHashMap<String, StructInfo>,
    functions: FxHashMap<String, FnSig>,
    methods: FxHashMap<(String, String), FnSig>,
    /// Alias names already diagnosed as cyclic; resolving through them
    /// yields `Unknown` without re-reporting.
    cyclic_aliases: FxHashSet<String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- aliases ----------------------------------------------------------

    /// Register `name → ty`. Returns `Err(name)` when the new entry closes
    /// an alias cycle; the cycle is remembered and later resolutions of any
    /// member return `Unknown`.
    pub fn define_alias(&mut self, name: &str, ty: Type) -> Result<(), String> {
        self.aliases.insert(name.to_string(), ty);

        // Walk the chain from the new entry; a revisit is a cycle.
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut current = name.to_string();
        seen.insert(current.clone());
        loop {
            let next = match self.aliases.get(&current) {
                Some(Type::Struct { name, type_params }) if type_params.is_empty() => name.clone(),
                _ => return Ok(()),
            };
            if !seen.insert(next.clone()) {
                for member in seen {
                    self.cyclic_aliases.insert(member);
                }
                return Err(name.to_string());
            }
            if !self.aliases.contains_key(&next) {
                return Ok(());
            }
            current = next;
        }
    }

    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    /// Replace alias references until a non-alias type is reached,
    /// recursing into type parameters, array elements, and function types.
    /// Members of a detected cycle resolve to `Unknown`.
    pub fn resolve(&self, ty: &Type) -> Type {
        match ty {
            Type::Struct { name, type_params } => {
                if self.cyclic_aliases.contains(name) {
                    return Type::Unknown;
                }
                if type_params.is_empty() {
                    if let Some(target) = self.aliases.get(name) {
                        return self.resolve(target);
                    }
                }
                Type::Struct {
                    name: name.clone(),
                    type_params: type_params.iter().map(|t| self.resolve(t)).collect(),
                }
            }
            Type::Array(elem) => Type::Array(Box::new(self.resolve(elem))),
            Type::Function { ret, params } => Type::Function {
                ret: Box::new(self.resolve(ret)),
                params: params.iter().map(|t| self.resolve(t)).collect(),
            },
            other => other.clone(),
        }
    }

    /// Structural equality on resolved types.
    pub fn types_equal(&self, a: &Type, b: &Type) -> bool {
        self.resolve(a) == self.resolve(b)
    }

    // ---- structs ----------------------------------------------------------

    pub fn define_struct(&mut self, name: &str, fields: Vec<(String, Type)>) {
        self.structs.insert(name.to_string(), StructInfo { fields });
    }

    pub fn struct_info(&self, name: &str) -> Option<&StructInfo> {
        self.structs.get(name)
    }

    pub fn has_struct(&self, name: &str) -> bool {
        self.structs.contains_key(name) || name == "Option"
    }

    /// Look up a field on a struct-typed value: `(index, field type)`.
    ///
    /// `Option<T>` is well-known: `hasValue: bool` at index 0 and
    /// `value: T` at index 1, with `T` substituted from the type parameter.
    pub fn field_of(&self, struct_ty: &Type, field: &str) -> Option<(usize, Type)> {
        let Type::Struct { name, type_params } = self.resolve(struct_ty) else {
            return None;
        };
        if name == "Option" {
            let inner = type_params.first().cloned().unwrap_or(Type::Unknown);
            return match field {
                "hasValue" => Some((0, Type::Bool)),
                "value" => Some((1, inner)),
                _ => None,
            };
        }
        self.structs
            .get(&name)
            .and_then(|info| info.field(field))
            .map(|(i, t)| (i, self.resolve(t)))
    }

    // ---- functions and methods --------------------------------------------

    pub fn define_function(&mut self, name: &str, sig: FnSig) {
        self.functions.insert(name.to_string(), sig);
    }

    pub fn function(&self, name: &str) -> Option<&FnSig> {
        self.functions.get(name)
    }

    pub fn define_method(&mut self, struct_name: &str, method: &str, sig: FnSig) {
        self.methods
            .insert((struct_name.to_string(), method.to_string()), sig);
    }

    pub fn method(&self, struct_name: &str, method: &str) -> Option<&FnSig> {
        self.methods
            .get(&(struct_name.to_string(), method.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_chain_resolves_to_target() {
        let mut registry = TypeRegistry::new();
        registry.define_alias("UserId", Type::Int).unwrap();
        registry.define_alias("AccountId", Type::named("UserId")).unwrap();

        assert_eq!(registry.resolve(&Type::named("AccountId")), Type::Int);
        assert!(registry.types_equal(&Type::named("UserId"), &Type::Int));
    }

    #[test]
    fn alias_cycle_detected_then_unknown() {
        let mut registry = TypeRegistry::new();
        registry.define_alias("A", Type::named("B")).unwrap();
        let err = registry.define_alias("B", Type::named("A")).unwrap_err();
        assert_eq!(err, "B");

        // Subsequent resolutions terminate and yield Unknown.
        assert_eq!(registry.resolve(&Type::named("A")), Type::Unknown);
        assert_eq!(registry.resolve(&Type::named("B")), Type::Unknown);
    }

    #[test]
    fn aliases_resolve_inside_compound_types() {
        let mut registry = TypeRegistry::new();
        registry.define_alias("Id", Type::Int).unwrap();

        let arr = Type::Array(Box::new(Type::named("Id")));
        assert_eq!(registry.resolve(&arr), Type::Array(Box::new(Type::Int)));

        let opt = Type::option(Type::named("Id"));
        assert_eq!(registry.resolve(&opt), Type::option(Type::Int));
    }

    #[test]
    fn struct_fields_keep_declaration_order() {
        let mut registry = TypeRegistry::new();
        registry.define_struct(
            "Point",
            vec![("x".to_string(), Type::Int), ("y".to_string(), Type::Int)],
        );
        let ty = Type::named("Point");
        assert_eq!(registry.field_of(&ty, "x"), Some((0, Type::Int)));
        assert_eq!(registry.field_of(&ty, "y"), Some((1, Type::Int)));
        assert_eq!(registry.field_of(&ty, "z"), None);
    }

    #[test]
    fn option_is_well_known() {
        let registry = TypeRegistry::new();
        let opt = Type::option(Type::String);
        assert_eq!(registry.field_of(&opt, "hasValue"), Some((0, Type::Bool)));
        assert_eq!(registry.field_of(&opt, "value"), Some((1, Type::String)));
        assert!(registry.has_struct("Option"));
    }
}
