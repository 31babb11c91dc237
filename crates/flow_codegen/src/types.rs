use flow_frontend::ast::Type;

/// IR type of the array descriptor: `{ data pointer, length }`. The dotted
/// name cannot collide with a user struct (identifiers have no `.`).
pub const ARRAY_TYPE: &str = "%struct.flow.array";

/// Map a resolved Flow type to its IR value type.
///
/// Strings and function values are pointers; arrays are `{ ptr, i64 }`
/// descriptors so the length travels with the value and every index
/// operation can be bounds-checked; structs are first-class aggregates
/// (`%struct.Name`), loaded and stored whole, which is also how fields
/// keep their declaration-order layout.
pub fn ir_type(ty: &Type) -> String {
    match ty {
        Type::Int => "i64".to_string(),
        Type::Float => "double".to_string(),
        Type::Bool => "i1".to_string(),
        Type::String => "ptr".to_string(),
        Type::Void => "void".to_string(),
        // Unrecoverable analysis errors leave Unknown behind; any slot type
        // keeps the IR well formed on the error path.
        Type::Unknown => "i64".to_string(),
        Type::Struct { .. } => format!("%struct.{}", mangle(ty)),
        Type::Array(_) => ARRAY_TYPE.to_string(),
        Type::Function { .. } => "ptr".to_string(),
    }
}

/// Stable name component for a type, used to instantiate generic structs:
/// `Option<int>` becomes `%struct.Option.i64`.
pub fn mangle(ty: &Type) -> String {
    match ty {
        Type::Int => "i64".to_string(),
        Type::Float => "double".to_string(),
        Type::Bool => "i1".to_string(),
        Type::String => "str".to_string(),
        Type::Void => "void".to_string(),
        Type::Unknown => "unknown".to_string(),
        Type::Struct { name, type_params } => {
            if type_params.is_empty() {
                name.clone()
            } else {
                let params: Vec<String> = type_params.iter().map(mangle).collect();
                format!("{name}.{}", params.join("."))
            }
        }
        Type::Array(elem) => format!("arr.{}", mangle(elem)),
        Type::Function { .. } => "fn".to_string(),
    }
}

/// The zero value of a type, used for the default-return fallback.
pub fn zero_value(ir_ty: &str) -> &'static str {
    if ir_ty.starts_with("%struct.") {
        return "zeroinitializer";
    }
    match ir_ty {
        "double" => "0.000000e+00",
        "i1" => "false",
        "ptr" => "null",
        _ => "0",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_map_directly() {
        assert_eq!(ir_type(&Type::Int), "i64");
        assert_eq!(ir_type(&Type::Float), "double");
        assert_eq!(ir_type(&Type::Bool), "i1");
        assert_eq!(ir_type(&Type::String), "ptr");
        assert_eq!(ir_type(&Type::Void), "void");
    }

    #[test]
    fn option_instantiation_gets_a_mangled_struct_name() {
        assert_eq!(ir_type(&Type::option(Type::Int)), "%struct.Option.i64");
        assert_eq!(ir_type(&Type::named("Point")), "%struct.Point");
    }

    #[test]
    fn arrays_are_descriptors_functions_are_pointers() {
        assert_eq!(ir_type(&Type::Array(Box::new(Type::Int))), ARRAY_TYPE);
        assert_eq!(
            ir_type(&Type::Function {
                ret: Box::new(Type::Int),
                params: vec![]
            }),
            "ptr"
        );
    }

    #[test]
    fn zero_values_match_types() {
        assert_eq!(zero_value("i64"), "0");
        assert_eq!(zero_value("double"), "0.000000e+00");
        assert_eq!(zero_value("i1"), "false");
        assert_eq!(zero_value("ptr"), "null");
        assert_eq!(zero_value("%struct.Point"), "zeroinitializer");
        assert_eq!(zero_value(ARRAY_TYPE), "zeroinitializer");
    }
}
