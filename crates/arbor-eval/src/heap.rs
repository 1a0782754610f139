//! Object heap: classes, objects and arrays.

use cranelift_entity::{PrimaryMap, entity_impl};

use crate::value::Value;

/// Reference to a class.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);
entity_impl!(ClassId, "class");

/// Reference to an object or array.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);
entity_impl!(ObjectId, "obj");

#[derive(Clone, Debug)]
pub struct ClassData {
    pub name: String,
    /// Class flags word, as read by `iloadi @class_flags`.
    pub flags: u32,
    pub superclass: Option<ClassId>,
    /// Component class, for array classes.
    pub component: Option<ClassId>,
}

#[derive(Clone, Debug)]
pub struct ObjectData {
    pub class: ClassId,
    pub fields: Vec<Value>,
    /// Elements, for arrays.
    pub elements: Vec<Value>,
}

#[derive(Default)]
pub struct Heap {
    classes: PrimaryMap<ClassId, ClassData>,
    objects: PrimaryMap<ObjectId, ObjectData>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_class(&mut self, name: &str, flags: u32) -> ClassId {
        self.classes.push(ClassData {
            name: name.to_owned(),
            flags,
            superclass: None,
            component: None,
        })
    }

    pub fn define_subclass(&mut self, name: &str, flags: u32, superclass: ClassId) -> ClassId {
        self.classes.push(ClassData {
            name: name.to_owned(),
            flags,
            superclass: Some(superclass),
            component: None,
        })
    }

    /// Class of arrays whose elements are `component` references.
    pub fn define_array_class(&mut self, component: ClassId) -> ClassId {
        let name = format!("[{}", self.classes[component].name);
        self.classes.push(ClassData {
            name,
            flags: 0,
            superclass: None,
            component: Some(component),
        })
    }

    pub fn class(&self, class: ClassId) -> &ClassData {
        &self.classes[class]
    }

    pub fn new_object(&mut self, class: ClassId, fields: Vec<Value>) -> ObjectId {
        self.objects.push(ObjectData {
            class,
            fields,
            elements: Vec::new(),
        })
    }

    /// New array of `array_class` with `len` null elements.
    pub fn new_array(&mut self, array_class: ClassId, len: usize) -> ObjectId {
        self.objects.push(ObjectData {
            class: array_class,
            fields: Vec::new(),
            elements: vec![Value::NULL; len],
        })
    }

    pub fn object(&self, object: ObjectId) -> &ObjectData {
        &self.objects[object]
    }

    pub fn class_of(&self, object: ObjectId) -> ClassId {
        self.objects[object].class
    }

    pub fn element(&self, array: ObjectId, index: usize) -> Option<Value> {
        self.objects[array].elements.get(index).copied()
    }

    /// Store into an array element. Returns `false` when out of bounds.
    pub fn set_element(&mut self, array: ObjectId, index: usize, value: Value) -> bool {
        match self.objects[array].elements.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Whether `class` is `ancestor` or inherits from it.
    pub fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut cursor = Some(class);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.classes[current].superclass;
        }
        false
    }
}
